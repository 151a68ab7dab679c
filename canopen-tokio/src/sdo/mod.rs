//! Service Data Object (SDO) transfer engine, per CiA 301 §7.2.4.

pub mod abort;
pub mod client;
pub mod codec;
pub mod error;
pub mod queue;
pub mod scanner;
pub mod server;
pub mod transfer;
pub mod typed;

mod address;
pub use address::*;

pub use abort::AbortCode;
pub use client::ClientFSM;
pub use error::{
	ConfigError, MalformedResponse, SdoError, TransferAborted, UnexpectedResponse,
	UploadError, WrongDataCount,
};
pub use server::ServerFSM;
pub use typed::{DownloadObject, UploadObject};
