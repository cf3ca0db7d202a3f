// Copyright 2025 Offload Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Offload CLI
//!
//! Command-line interface for the computation offloading system.
//!
//! - **Gateway**: leases compute nodes to clients and bridges their sessions
//! - **Host**: execution host running on each compute node
//! - **Call**: one-shot client session for scripting and smoke tests
//!
//! ## Architecture
//!
//! The CLI uses the `argh` crate for argument parsing and dispatches to
//! `offload-gateway`, `offload-host` and `offload-client`. The helpers in
//! [`setup`] turn command-line options into the configuration those crates
//! expect.
//!
//! ## Key Commands
//!
//! - `offload gateway`: Start the gateway over a node inventory
//! - `offload host`: Start an execution host with an artifact cache
//! - `offload call`: Register an artifact and run one call through a gateway

pub mod setup;
