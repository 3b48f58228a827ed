pub mod config;
pub mod error;
pub mod host;
pub mod types;

pub use config::SearchConfig;
pub use error::{Result, SearchError};
pub use host::{FakeHost, HostCapabilities};
pub use types::{
    bucket_index, fake_channel_id_with, hash_channel_id, real_channel_id_for, Channel,
    ChannelId, ChannelMessageReq, ChannelMessageResp, Message, NodeGroup, SearchReq, SearchResp,
    UserSearchReq, BUCKET_COUNT, CHANNEL_TYPE_PERSON,
};
