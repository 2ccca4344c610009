pub mod endpoints; // URLパターンによるリクエスト分類
pub mod fetch; // Fetch抽象とページのfetchスロット
pub mod fetch_interceptor; // fetchのラップとイベント発行
pub mod stream_processor; // ストリーミング応答のバッファリング

pub use endpoints::{request_path, EndpointSet, Pattern};
pub use fetch::{
    BodyStream, Fetch, FetchError, FetchRequest, FetchResponse, FetchSlot, ReqwestFetch,
    ResponseBody,
};
pub use fetch_interceptor::{FetchInterceptor, InterceptingFetch, InterceptorSettings};
pub use stream_processor::{
    ChatGptSseProcessor, MistralLineProcessor, StreamFormat, StreamProcessor,
};
