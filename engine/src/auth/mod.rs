//! Connection-string parsing and SAS token generation for the management API.

pub mod connection_string;
pub mod sas_token_generator;

pub use connection_string::ParsedConnectionString;
pub use sas_token_generator::SasTokenGenerator;
