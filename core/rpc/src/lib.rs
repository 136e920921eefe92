// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod circuit_breaker;
pub mod client;
pub mod errors;
pub mod health;
pub mod identity;
pub mod metrics;
pub mod request;
pub mod server;
pub mod status;

pub use errors::{RpcError, is_infrastructure_failure, kind_of};
pub use identity::{IdentityHeaders, RequestIdentity, RequestMetadata};
pub use request::{Procedure, RpcRequest};
pub use status::ErrorKind;
