//! 聊天与通知 HTTP API 客户端
//!
//! 负责所有 REST 请求。认证信息通过共享 `reqwest::Client` 的默认请求头注入，
//! 各方法只拼接路径并解析统一响应。

use crate::chat::types::{handle_http_response, Conversation, Message, Notification};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

/// 聊天 REST 接口
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// 当前用户的会话列表
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// 管理员视角的全部会话
    async fn admin_conversations(&self) -> Result<Vec<Conversation>>;

    /// 获取或创建与 `participant_id` 的会话（服务端幂等）
    async fn open_conversation(&self, participant_id: &str) -> Result<Conversation>;

    /// 会话消息历史
    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// 标记会话已读
    async fn mark_read(&self, conversation_id: &str) -> Result<()>;
}

/// 通知中心 REST 接口
#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn unread_count(&self) -> Result<u32>;

    async fn list(&self) -> Result<Vec<Notification>>;

    async fn mark_read(&self, notification_id: &str) -> Result<()>;

    async fn mark_all_read(&self) -> Result<()>;
}

/// 创建带 bearer token 的共享 HTTP 客户端
pub fn build_http_client(token: &str) -> Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .default_headers({
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                    .context("无效的 token")?,
            );
            headers
        })
        .build()
        .context("创建 HTTP 客户端失败")
}

/// 基于 reqwest 的聊天 API 实现
pub struct HttpChatApi {
    client: reqwest::Client,
    api_base_url: String,
}

impl HttpChatApi {
    /// `client` 应该已经配置好认证请求头
    pub fn new(client: reqwest::Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }
}

#[derive(Deserialize)]
struct UnreadCountData {
    count: u32,
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let url = self.url("/chat/conversations");
        debug!("[ChatAPI] 📡 请求会话列表: {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .send()
            .await
            .context("请求失败")?;

        let api_resp = handle_http_response::<Vec<Conversation>>(response, "会话列表").await?;
        let list = api_resp.data.unwrap_or_default();
        info!("[ChatAPI] ✅ 会话列表响应，会话数: {}", list.len());
        Ok(list)
    }

    async fn admin_conversations(&self) -> Result<Vec<Conversation>> {
        let url = self.url("/chat/admin/conversations");
        debug!("[ChatAPI] 📡 请求管理员会话列表: {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .send()
            .await
            .context("请求失败")?;

        let api_resp =
            handle_http_response::<Vec<Conversation>>(response, "管理员会话列表").await?;
        let list = api_resp.data.unwrap_or_default();
        info!("[ChatAPI] ✅ 管理员会话列表响应，会话数: {}", list.len());
        Ok(list)
    }

    async fn open_conversation(&self, participant_id: &str) -> Result<Conversation> {
        let url = self.url("/chat/conversations");
        info!("[ChatAPI] 📡 获取或创建会话，对方: {}", participant_id);

        let response = self
            .client
            .post(&url)
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .json(&serde_json::json!({ "participantId": participant_id }))
            .send()
            .await
            .context("请求失败")?;

        let api_resp = handle_http_response::<Conversation>(response, "获取或创建会话").await?;
        api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("响应中缺少 data 字段"))
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let url = self.url(&format!("/chat/conversations/{}/messages", conversation_id));
        debug!("[ChatAPI] 📡 请求消息历史: {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .send()
            .await
            .context("请求失败")?;

        let api_resp = handle_http_response::<Vec<Message>>(response, "消息历史").await?;
        let list = api_resp.data.unwrap_or_default();
        debug!(
            "[ChatAPI] 会话 {} 历史消息数: {}",
            conversation_id,
            list.len()
        );
        Ok(list)
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        let url = self.url(&format!("/chat/conversations/{}/read", conversation_id));
        debug!("[ChatAPI] 📡 标记会话已读: {}", conversation_id);

        let response = self
            .client
            .patch(&url)
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .send()
            .await
            .context("请求失败")?;

        handle_http_response::<serde_json::Value>(response, "标记会话已读").await?;
        Ok(())
    }
}

/// 基于 reqwest 的通知 API 实现
pub struct HttpNotificationApi {
    client: reqwest::Client,
    api_base_url: String,
}

impl HttpNotificationApi {
    pub fn new(client: reqwest::Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn unread_count(&self) -> Result<u32> {
        let response = self
            .client
            .get(self.url("/notifications/unread-count"))
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .send()
            .await
            .context("请求失败")?;

        let api_resp = handle_http_response::<UnreadCountData>(response, "通知未读数").await?;
        Ok(api_resp.data.map(|d| d.count).unwrap_or(0))
    }

    async fn list(&self) -> Result<Vec<Notification>> {
        info!("[NotifyAPI] 📡 请求通知列表");
        let response = self
            .client
            .get(self.url("/notifications"))
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .send()
            .await
            .context("请求失败")?;

        let api_resp = handle_http_response::<Vec<Notification>>(response, "通知列表").await?;
        Ok(api_resp.data.unwrap_or_default())
    }

    async fn mark_read(&self, notification_id: &str) -> Result<()> {
        let response = self
            .client
            .patch(self.url(&format!("/notifications/{}/read", notification_id)))
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .send()
            .await
            .context("请求失败")?;

        handle_http_response::<serde_json::Value>(response, "标记通知已读").await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<()> {
        let response = self
            .client
            .patch(self.url("/notifications/read-all"))
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .send()
            .await
            .context("请求失败")?;

        handle_http_response::<serde_json::Value>(response, "全部通知已读").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::{init_test_logger, HttpStub};
    use serde_json::json;

    fn conversation_json(id: &str) -> serde_json::Value {
        json!({
            "_id": id,
            "participants": [
                {"_id": "u1", "name": "Ann", "role": "user"},
                {"_id": "a1", "name": "Support", "role": "admin"}
            ],
            "lastMessage": "hi",
            "unreadCount": {"u1": 2}
        })
    }

    #[tokio::test]
    async fn chat_api_uses_expected_routes() {
        init_test_logger();
        let stub = HttpStub::start(vec![
            (200, json!({"success": true, "data": [conversation_json("c1")]})),
            (200, json!({"success": true, "data": [conversation_json("c1"), conversation_json("c2")]})),
            (200, json!({"success": true, "data": conversation_json("c1")})),
            (200, json!({"success": true, "data": [{
                "_id": "m1",
                "sender": {"_id": "a1", "name": "Support", "role": "admin"},
                "conversation": "c1",
                "content": "hello",
                "createdAt": "2024-05-01T10:00:00Z"
            }]})),
            (200, json!({"success": true})),
        ])
        .await;
        let client = build_http_client("tok").unwrap();
        let api = HttpChatApi::new(client, format!("{}/", stub.base_url()));

        let mine = api.list_conversations().await.unwrap();
        assert_eq!(mine[0].unread_for("u1"), 2);
        assert_eq!(api.admin_conversations().await.unwrap().len(), 2);
        assert_eq!(api.open_conversation("a1").await.unwrap().id, "c1");
        let history = api.messages("c1").await.unwrap();
        assert_eq!(history[0].conversation_id, "c1");
        api.mark_read("c1").await.unwrap();

        let requests = stub.requests();
        let routes: Vec<(&str, &str)> = requests
            .iter()
            .map(|r| (r.method.as_str(), r.path.as_str()))
            .collect();
        assert_eq!(
            routes,
            vec![
                ("GET", "/api/chat/conversations"),
                ("GET", "/api/chat/admin/conversations"),
                ("POST", "/api/chat/conversations"),
                ("GET", "/api/chat/conversations/c1/messages"),
                ("PATCH", "/api/chat/conversations/c1/read"),
            ]
        );
        assert!(requests
            .iter()
            .all(|r| r.header("Authorization") == Some("Bearer tok")));
        assert!(requests.iter().all(|r| r.header("X-Request-Id").is_some()));
        assert_eq!(requests[2].json(), json!({"participantId": "a1"}));
    }

    #[tokio::test]
    async fn notification_api_uses_expected_routes() {
        let stub = HttpStub::start(vec![
            (200, json!({"success": true, "data": {"count": 4}})),
            (200, json!({"success": true, "data": [{
                "_id": "n1",
                "title": "Document approved",
                "message": "Your license was approved",
                "type": "document",
                "read": false,
                "createdAt": "2024-05-01T10:00:00Z"
            }]})),
            (200, json!({"success": true})),
            (200, json!({"success": true})),
        ])
        .await;
        let api = HttpNotificationApi::new(build_http_client("tok").unwrap(), stub.base_url());

        assert_eq!(api.unread_count().await.unwrap(), 4);
        let list = api.list().await.unwrap();
        assert_eq!(list[0].kind, "document");
        api.mark_read("n1").await.unwrap();
        api.mark_all_read().await.unwrap();

        let routes: Vec<(String, String)> = stub
            .requests()
            .into_iter()
            .map(|r| (r.method, r.path))
            .collect();
        let expected = [
            ("GET", "/api/notifications/unread-count"),
            ("GET", "/api/notifications"),
            ("PATCH", "/api/notifications/n1/read"),
            ("PATCH", "/api/notifications/read-all"),
        ];
        assert_eq!(routes.len(), expected.len());
        for ((method, path), (m, p)) in routes.iter().zip(expected) {
            assert_eq!(method, m);
            assert_eq!(path, p);
        }
    }

    #[tokio::test]
    async fn error_envelopes_become_errors() {
        let stub = HttpStub::start(vec![
            (200, json!({"success": false, "message": "conversation locked"})),
            (500, json!({"success": false, "message": "boom"})),
            (200, json!({"success": true})),
            (200, json!({"success": true, "data": null})),
        ])
        .await;
        let api = HttpChatApi::new(build_http_client("tok").unwrap(), stub.base_url());

        let err = api.mark_read("c1").await.unwrap_err();
        assert!(format!("{:#}", err).contains("conversation locked"));

        let err = api.list_conversations().await.unwrap_err();
        assert!(format!("{:#}", err).contains("500"));

        // 获取或创建会话必须带回 data
        let err = api.open_conversation("a1").await.unwrap_err();
        assert!(format!("{:#}", err).contains("data"));

        // 列表缺省 data 视为空
        assert!(api.messages("c1").await.unwrap().is_empty());
    }
}
