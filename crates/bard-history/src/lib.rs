// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod store;
mod validate;

pub use store::{
    generate_session_name, read_last_session, read_model, read_parameters, write_model,
    write_parameters, write_session, HistoryError, RestoredSession,
};
pub use validate::{validate, ProtocolViolation};
