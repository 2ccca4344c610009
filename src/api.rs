pub mod message_api; // バックエンドへの保存API

pub use message_api::{
    ApiError, ApiResponse, HttpMessageApi, InMemoryMessageApi, MessageApi,
};
