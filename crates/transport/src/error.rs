//! Transport 错误类型

use contracts::ContractError;
use thiserror::Error;

/// Transport 错误
#[derive(Debug, Error)]
pub enum TransportError {
    /// JSON 编解码失败
    #[error("json codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// 通道已关闭
    #[error("channel closed for {endpoint}")]
    ChannelClosed {
        /// 端点名称 (session id / source name)
        endpoint: String,
    },

    /// 接口层错误
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl TransportError {
    /// Create channel closed error
    pub fn channel_closed(endpoint: impl Into<String>) -> Self {
        Self::ChannelClosed {
            endpoint: endpoint.into(),
        }
    }
}

/// Transport Result 类型别名
pub type Result<T> = std::result::Result<T, TransportError>;
