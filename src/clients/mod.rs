pub mod feishu_client;

pub use feishu_client::{FeishuAuth, FeishuClient};
