// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod backoff;
pub mod client;
pub mod component;
pub mod errors;
pub mod headers;
pub mod provider;
pub mod server;

mod duration;
