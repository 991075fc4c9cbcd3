#![doc = include_str!("../README.md")]

pub mod article;
pub mod backend;
pub mod base36;
pub mod cache;
pub mod cidr;
pub mod config;
pub mod error;
pub mod highlow;
pub mod listener;
pub mod model;
pub mod posting;
pub mod protocol;
pub mod status;
pub mod storage;

pub use backend::{Backend, GroupSummary};
pub use error::{Result, ServerError};
pub use model::{ArticleRef, BaseGroupInfo, BlacklistEntry, Config, Moderator, PostingStatus};
