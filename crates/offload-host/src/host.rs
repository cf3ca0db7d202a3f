use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info, warn};

use offload_common::protocol::envelope::{CallError, CallResult};
use offload_common::protocol::error::{OffloadError, Result};
use offload_common::protocol::tags::Tag;
use offload_common::transport::codec::{JsonCodec, ENVELOPE_FIELDS};
use offload_common::transport::TcpTransport;

use crate::cache::ArtifactCache;
use crate::dispatch::dispatch;
use crate::loader::ArtifactLoader;
use crate::module::CodeModule;

/// Execution host for one compute node.
///
/// Serves one control connection at a time, which matches the pool's
/// one-lease-per-node rule. Each connection starts with no code loaded;
/// `CODE_REGISTER` loads the named artifact from the cache, requesting the
/// bytes first if they are not cached yet.
pub struct ExecutionHost {
    listener: TcpListener,
    cache: ArtifactCache,
    loader: Box<dyn ArtifactLoader>,
}

/// Code loaded on the current connection.
enum Loaded {
    Nothing,
    Module(Box<dyn CodeModule>),
    Failed { artifact: String, reason: String },
}

impl ExecutionHost {
    pub fn bind(addr: &str, cache: ArtifactCache, loader: Box<dyn ArtifactLoader>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| OffloadError::Connection(format!("Failed to bind to {}: {}", addr, e)))?;

        Ok(Self {
            listener,
            cache,
            loader,
        })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| OffloadError::Connection(format!("Failed to get local addr: {}", e)))
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Serves control connections one after another, forever.
    pub fn serve(&self) -> Result<()> {
        info!("Execution host listening on {}", self.local_addr()?);

        loop {
            let (stream, peer_addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            info!("Control connection from {}", peer_addr);
            match self.handle_connection(stream) {
                Ok(()) => info!("Control connection from {} closed", peer_addr),
                Err(e) => warn!("Control connection from {} failed: {}", peer_addr, e),
            }
        }
    }

    /// Runs the command loop for one control connection until it
    /// disconnects.
    pub fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let _ = stream.set_nodelay(true);
        let mut loaded = Loaded::Nothing;

        loop {
            let tag = TcpTransport::read_tag(&mut stream)?;
            debug!("Host received {}", tag);

            match tag {
                Tag::Ping => TcpTransport::write_tag(&mut stream, Tag::Pong)?,
                Tag::CodeRegister => {
                    let name = TcpTransport::receive_string(&mut stream)?;
                    loaded = self.register(&mut stream, &name)?;
                }
                Tag::ComputationRequest => self.compute(&mut stream, &mut loaded)?,
                Tag::ComputationRequestWithFile => {
                    let file_name = TcpTransport::receive_string(&mut stream)?;
                    let data = TcpTransport::receive_frame(&mut stream)?;
                    match self.cache.store_resource(&file_name, &data) {
                        Ok(_) => self.compute(&mut stream, &mut loaded)?,
                        Err(e) => {
                            warn!("Rejected resource file {:?}: {}", file_name, e);
                            let err = CallError::materialization(format!(
                                "resource file '{}' not stored: {}",
                                file_name, e
                            ));
                            read_call_fields(&mut stream)?;
                            TcpTransport::send_result(&mut stream, &CallResult::Error(err))?;
                        }
                    }
                }
                tag if tag.is_disconnect() => return Ok(()),
                other => {
                    return Err(OffloadError::UnexpectedTag {
                        expected: "host command".to_string(),
                        got: other.as_byte(),
                    });
                }
            }
        }
    }

    fn register(&self, stream: &mut TcpStream, name: &str) -> Result<Loaded> {
        if self.cache.contains(name)? {
            TcpTransport::write_tag(stream, Tag::CodePresent)?;
            debug!("Artifact {} served from cache", name);
        } else {
            TcpTransport::write_tag(stream, Tag::CodeRequest)?;
            let bytes = TcpTransport::receive_frame(stream)?;
            self.cache.store_artifact(name, &bytes)?;
            info!("Received artifact {} ({} bytes)", name, bytes.len());
        }

        let bytes = self.cache.read_artifact(name)?;
        match self.loader.load(name, &bytes) {
            Ok(module) => Ok(Loaded::Module(module)),
            Err(e) => {
                warn!("Artifact {} failed to load: {}", name, e);
                Ok(Loaded::Failed {
                    artifact: name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Reads all five call fields, then dispatches and replies.
    fn compute(&self, stream: &mut TcpStream, loaded: &mut Loaded) -> Result<()> {
        let fields = read_call_fields(stream)?;

        let result = match JsonCodec::decode_envelope(fields) {
            Err(e) => CallResult::Error(CallError::materialization(e.to_string())),
            Ok(envelope) => match loaded {
                Loaded::Module(module) => dispatch(module.as_mut(), &envelope),
                Loaded::Nothing => CallResult::Error(CallError::type_resolution(format!(
                    "no code artifact registered for type '{}'",
                    envelope.target_type
                ))),
                Loaded::Failed { artifact, reason } => CallResult::Error(CallError::type_resolution(
                    format!("artifact {} failed to load: {}", artifact, reason),
                )),
            },
        };

        TcpTransport::send_result(stream, &result)
    }
}

fn read_call_fields(stream: &mut TcpStream) -> Result<[Vec<u8>; ENVELOPE_FIELDS]> {
    let mut fields: [Vec<u8>; ENVELOPE_FIELDS] = Default::default();
    for field in fields.iter_mut() {
        *field = TcpTransport::receive_frame(stream)?;
    }
    Ok(fields)
}
