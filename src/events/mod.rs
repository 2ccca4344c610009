//! イベントバス
//!
//! インターセプタ、プラットフォームアダプタ、UI 層を疎結合にするための
//! 型付き publish/subscribe。tokio::sync::broadcast を使用し、
//! 購読者ごとに独立したバッファを持つ。

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::models::{AssistantResponse, Conversation, Message, Provider};

/// イベント名（拡張機能の他の部分と共有する識別子）
pub mod names {
    pub const NETWORK_INTERCEPT: &str = "jaydai:network-intercept";
    pub const CONVERSATION_LIST: &str = "jaydai:conversation-list";
    pub const MESSAGE_EXTRACTED: &str = "jaydai:message-extracted";
    pub const CONVERSATION_LOADED: &str = "jaydai:conversation-loaded";

    pub const USER_INFO: &str = "jaydai:user-info";
    pub const SPECIFIC_CONVERSATION: &str = "jaydai:specific-conversation";
    pub const CHAT_COMPLETION: &str = "jaydai:chat-completion";
    pub const ASSISTANT_RESPONSE: &str = "jaydai:assistant-response";
}

/// インターセプトしたトラフィックの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InterceptKind {
    UserInfo,
    ConversationList,
    SpecificConversation,
    ChatCompletion,
    AssistantResponse,
}

impl InterceptKind {
    /// ペイロードの `type` に入る名前
    pub fn type_name(&self) -> &'static str {
        match self {
            InterceptKind::UserInfo => names::USER_INFO,
            InterceptKind::ConversationList => names::CONVERSATION_LIST,
            InterceptKind::SpecificConversation => names::SPECIFIC_CONVERSATION,
            InterceptKind::ChatCompletion => names::CHAT_COMPLETION,
            InterceptKind::AssistantResponse => names::ASSISTANT_RESPONSE,
        }
    }
}

/// インターセプトしたデータ本体
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "camelCase")]
pub enum InterceptData {
    /// 通常の JSON レスポンス（会話一覧・個別会話・ユーザー情報）
    #[serde(rename_all = "camelCase")]
    Exchange {
        url: String,
        method: String,
        request_body: Option<Value>,
        response_body: Value,
    },
    /// 送信されたメッセージ
    #[serde(rename_all = "camelCase")]
    ChatCompletion {
        url: String,
        request_body: Option<Value>,
    },
    /// ストリームで受信したアシスタントの応答
    AssistantResponse(AssistantResponse),
}

/// `{ type, data, timestamp }` 形式のインターセプトイベント
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterceptedTraffic {
    #[serde(rename = "type")]
    pub kind: InterceptKind,
    pub platform: Provider,
    pub data: InterceptData,
    /// エポックミリ秒
    pub timestamp: i64,
}

/// バス上を流れるイベント
#[derive(Debug, Clone, PartialEq)]
pub enum JaydaiEvent {
    /// 一覧以外の分類済みトラフィック
    NetworkIntercept(InterceptedTraffic),
    /// 会話一覧（大きな配列になるため別イベント）
    ConversationList(InterceptedTraffic),
    /// 抽出されたメッセージ
    MessageExtracted { message: Message, platform: Provider },
    /// 読み込まれた会話とそのメッセージ
    ConversationLoaded {
        conversation: Conversation,
        messages: Vec<Message>,
    },
}

impl JaydaiEvent {
    /// インターセプト結果をイベントに変換（一覧は専用イベント名）
    pub fn intercepted(traffic: InterceptedTraffic) -> Self {
        if traffic.kind == InterceptKind::ConversationList {
            JaydaiEvent::ConversationList(traffic)
        } else {
            JaydaiEvent::NetworkIntercept(traffic)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JaydaiEvent::NetworkIntercept(_) => names::NETWORK_INTERCEPT,
            JaydaiEvent::ConversationList(_) => names::CONVERSATION_LIST,
            JaydaiEvent::MessageExtracted { .. } => names::MESSAGE_EXTRACTED,
            JaydaiEvent::ConversationLoaded { .. } => names::CONVERSATION_LOADED,
        }
    }

    /// CustomEvent の `detail` に相当する JSON
    pub fn detail(&self) -> Value {
        match self {
            JaydaiEvent::NetworkIntercept(traffic) | JaydaiEvent::ConversationList(traffic) => {
                serde_json::to_value(traffic).unwrap_or(Value::Null)
            }
            JaydaiEvent::MessageExtracted { message, .. } => json!({ "message": message }),
            JaydaiEvent::ConversationLoaded {
                conversation,
                messages,
            } => json!({ "conversation": conversation, "messages": messages }),
        }
    }

    pub fn as_intercepted(&self) -> Option<&InterceptedTraffic> {
        match self {
            JaydaiEvent::NetworkIntercept(traffic) | JaydaiEvent::ConversationList(traffic) => {
                Some(traffic)
            }
            _ => None,
        }
    }
}

/// 型付きイベントバス
///
/// 送信は非ブロッキング。購読者がいない場合イベントは破棄される。
/// 遅い購読者はバッファ容量を超えると古いイベントを取りこぼす（lagged）。
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JaydaiEvent>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JaydaiEvent> {
        self.sender.subscribe()
    }

    /// Stream 形式で購読（lagged は `Err` として届く）
    pub fn subscribe_stream(&self) -> BroadcastStream<JaydaiEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// イベントを配信し、受信した購読者数を返す
    pub fn publish(&self, event: JaydaiEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::trace!(event = name, receivers, "📣 Event published");
                receivers
            }
            Err(_) => {
                tracing::trace!(event = name, "📭 Event dropped: no subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use serde_json::json;
    use std::time::Duration;

    fn traffic(kind: InterceptKind) -> InterceptedTraffic {
        InterceptedTraffic {
            kind,
            platform: Provider::ChatGpt,
            data: InterceptData::Exchange {
                url: "/backend-api/conversations".to_string(),
                method: "GET".to_string(),
                request_body: None,
                response_body: json!({"items": []}),
            },
            timestamp: 1,
        }
    }

    #[test]
    fn test_list_traffic_uses_dedicated_event_name() {
        let list = JaydaiEvent::intercepted(traffic(InterceptKind::ConversationList));
        assert_eq!(list.name(), names::CONVERSATION_LIST);

        let specific = JaydaiEvent::intercepted(traffic(InterceptKind::SpecificConversation));
        assert_eq!(specific.name(), names::NETWORK_INTERCEPT);
    }

    #[test]
    fn test_intercepted_payload_shape() {
        let value = serde_json::to_value(traffic(InterceptKind::ConversationList)).unwrap();
        assert_eq!(value["type"], "ConversationList");
        assert_eq!(value["platform"], "ChatGPT");
        assert_eq!(value["timestamp"], 1);
        assert_eq!(value["data"]["method"], "GET");
    }

    #[test]
    fn test_event_detail_shapes() {
        let conversation = Conversation::new("c1", Some("Chat"), "Conversation", Provider::Claude);
        let loaded = JaydaiEvent::ConversationLoaded {
            conversation,
            messages: Vec::new(),
        };
        let detail = loaded.detail();
        assert_eq!(detail["conversation"]["provider_name"], "Claude");
        assert!(detail["messages"].as_array().unwrap().is_empty());

        let intercepted = JaydaiEvent::intercepted(traffic(InterceptKind::UserInfo)).detail();
        assert_eq!(intercepted["type"], "UserInfo");
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        let delivered = bus.publish(JaydaiEvent::intercepted(traffic(
            InterceptKind::UserInfo,
        )));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = JaydaiEvent::MessageExtracted {
            message: Message {
                message_provider_id: "m1".to_string(),
                chat_provider_id: String::new(),
                content: "hi".to_string(),
                role: Role::User,
                model: "unknown".to_string(),
                created_at: 0,
                parent_message_provider_id: None,
            },
            platform: Provider::Claude,
        };
        assert_eq!(bus.publish(event.clone()), 2);

        let r1 = tokio::time::timeout(Duration::from_millis(100), rx1.recv())
            .await
            .expect("timeout")
            .expect("receive error");
        let r2 = tokio::time::timeout(Duration::from_millis(100), rx2.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        assert_eq!(r1, event);
        assert_eq!(r2, event);
    }

    #[tokio::test]
    async fn test_stream_subscriber_reports_lag() {
        use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
        use tokio_stream::StreamExt;

        let bus = EventBus::new(1);
        let mut stream = bus.subscribe_stream();

        bus.publish(JaydaiEvent::intercepted(traffic(InterceptKind::UserInfo)));
        let latest = JaydaiEvent::intercepted(traffic(InterceptKind::ConversationList));
        bus.publish(latest.clone());

        assert_eq!(
            stream.next().await,
            Some(Err(BroadcastStreamRecvError::Lagged(1)))
        );
        assert_eq!(stream.next().await, Some(Ok(latest)));
    }
}
