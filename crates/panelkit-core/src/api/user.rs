//! Authenticated `/user/*` endpoints.
//!
//! Thin wrappers: each call carries the resolved credential and goes through
//! the same expiry handling as the auth endpoints. Payloads are returned as
//! JSON with the `data` envelope removed.

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::{json, Value};

use super::client::ApiClient;

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderRequest {
    pub plan_id: u64,
    pub period: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TicketRequest {
    pub subject: String,
    pub message: String,
    /// 0 low, 1 medium, 2 high
    pub level: u8,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RemindSettings {
    #[serde(serialize_with = "as_flag")]
    pub remind_expire: bool,
    #[serde(serialize_with = "as_flag")]
    pub remind_traffic: bool,
}

fn as_flag<S: serde::Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

#[derive(Debug, Serialize)]
struct ChangePassword<'a> {
    old_password: &'a str,
    new_password: &'a str,
}

#[derive(Debug, Serialize)]
struct DepositOrder {
    period: &'static str,
    deposit_amount: u64,
    plan_id: u64,
}

#[derive(Debug, Serialize)]
struct Withdrawal<'a> {
    withdraw_amount: u64,
    withdraw_account: &'a str,
    withdraw_method: &'a str,
}

impl ApiClient {
    async fn fetch(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        Self::data(self.get(path, query).await?, path)
    }

    async fn submit<B: Serialize>(&self, path: &str, body: &B) -> Result<Value> {
        Self::data(self.post(path, body).await?, path)
    }

    // ===== Account =====

    pub async fn get_user_info(&self) -> Result<Value> {
        self.fetch("/user/info", &[]).await
    }

    pub async fn get_subscribe(&self) -> Result<Value> {
        self.fetch("/user/getSubscribe", &[]).await
    }

    pub async fn get_user_stats(&self) -> Result<Value> {
        self.fetch("/user/getStat", &[]).await
    }

    /// Currency, commission and other user-facing settings.
    pub async fn get_comm_config(&self) -> Result<Value> {
        self.fetch("/user/comm/config", &[]).await
    }

    pub async fn get_active_sessions(&self) -> Result<Value> {
        self.fetch("/user/getActiveSession", &[]).await
    }

    pub async fn get_telegram_bot_info(&self) -> Result<Value> {
        self.fetch("/user/telegram/getBotInfo", &[]).await
    }

    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<Value> {
        let body = ChangePassword {
            old_password,
            new_password,
        };
        self.submit("/user/changePassword", &body).await
    }

    /// Invalidates the subscription token and returns the new subscribe URL.
    pub async fn reset_security(&self) -> Result<Value> {
        self.fetch("/user/resetSecurity", &[]).await
    }

    pub async fn update_remind_settings(&self, settings: RemindSettings) -> Result<Value> {
        self.submit("/user/update", &settings).await
    }

    pub async fn redeem_gift_card(&self, code: &str) -> Result<Value> {
        self.submit("/user/redeemgiftcard", &json!({ "giftcard": code }))
            .await
    }

    pub async fn fetch_notices(&self) -> Result<Value> {
        self.fetch("/user/notice/fetch", &[]).await
    }

    pub async fn get_traffic_log(&self) -> Result<Value> {
        self.fetch("/user/stat/getTrafficLog", &[]).await
    }

    // ===== Plans and orders =====

    pub async fn fetch_plans(&self) -> Result<Value> {
        self.fetch("/user/plan/fetch", &[]).await
    }

    pub async fn fetch_plan(&self, id: u64) -> Result<Value> {
        let id = id.to_string();
        self.fetch("/user/plan/fetch", &[("id", &id)]).await
    }

    pub async fn check_coupon(&self, code: &str, plan_id: u64) -> Result<Value> {
        #[derive(Serialize)]
        struct CouponCheck<'a> {
            code: &'a str,
            plan_id: u64,
        }
        self.submit("/user/coupon/check", &CouponCheck { code, plan_id })
            .await
    }

    /// Create an order. Returns the trade number.
    pub async fn save_order(&self, request: &OrderRequest) -> Result<Value> {
        self.submit("/user/order/save", request).await
    }

    /// Create a balance top-up order; `amount` is in cents.
    pub async fn create_deposit_order(&self, amount: u64) -> Result<Value> {
        let body = DepositOrder {
            period: "deposit",
            deposit_amount: amount,
            plan_id: 0,
        };
        self.submit("/user/order/save", &body).await
    }

    pub async fn fetch_orders(&self) -> Result<Value> {
        self.fetch("/user/order/fetch", &[]).await
    }

    pub async fn get_order_detail(&self, trade_no: &str) -> Result<Value> {
        self.fetch("/user/order/detail", &[("trade_no", trade_no)])
            .await
    }

    pub async fn check_order(&self, trade_no: &str) -> Result<Value> {
        self.fetch("/user/order/check", &[("trade_no", trade_no)])
            .await
    }

    pub async fn get_payment_methods(&self) -> Result<Value> {
        self.fetch("/user/order/getPaymentMethod", &[]).await
    }

    pub async fn checkout_order(&self, trade_no: &str, method: u64) -> Result<Value> {
        #[derive(Serialize)]
        struct Checkout<'a> {
            trade_no: &'a str,
            method: u64,
        }
        self.submit("/user/order/checkout", &Checkout { trade_no, method })
            .await
    }

    pub async fn cancel_order(&self, trade_no: &str) -> Result<Value> {
        if trade_no.trim().is_empty() {
            bail!("Trade number must not be empty");
        }
        self.submit("/user/order/cancel", &json!({ "trade_no": trade_no }))
            .await
    }

    // ===== Servers =====

    pub async fn fetch_servers(&self) -> Result<Value> {
        self.fetch("/user/server/fetch", &[]).await
    }

    // ===== Tickets =====

    pub async fn fetch_tickets(&self) -> Result<Value> {
        self.fetch("/user/ticket/fetch", &[]).await
    }

    pub async fn get_ticket(&self, id: u64) -> Result<Value> {
        let id = id.to_string();
        self.fetch("/user/ticket/fetch", &[("id", &id)]).await
    }

    pub async fn create_ticket(&self, request: &TicketRequest) -> Result<Value> {
        self.submit("/user/ticket/save", request).await
    }

    pub async fn reply_ticket(&self, id: u64, message: &str) -> Result<Value> {
        #[derive(Serialize)]
        struct Reply<'a> {
            id: u64,
            message: &'a str,
        }
        self.submit("/user/ticket/reply", &Reply { id, message })
            .await
    }

    pub async fn close_ticket(&self, id: u64) -> Result<Value> {
        self.submit("/user/ticket/close", &json!({ "id": id })).await
    }

    // ===== Invites and commission =====

    pub async fn fetch_invites(&self) -> Result<Value> {
        self.fetch("/user/invite/fetch", &[]).await
    }

    pub async fn get_invite_details(&self, current: u32, page_size: u32) -> Result<Value> {
        let current = current.to_string();
        let page_size = page_size.to_string();
        self.fetch(
            "/user/invite/details",
            &[("current", &current), ("page_size", &page_size)],
        )
        .await
    }

    pub async fn generate_invite_code(&self) -> Result<Value> {
        self.fetch("/user/invite/save", &[]).await
    }

    /// Move commission into the account balance; `amount` is in cents.
    pub async fn transfer_commission(&self, amount: u64) -> Result<Value> {
        self.submit("/user/transfer", &json!({ "transfer_amount": amount }))
            .await
    }

    pub async fn withdraw_commission(&self, amount: u64, account: &str, method: &str) -> Result<Value> {
        let body = Withdrawal {
            withdraw_amount: amount,
            withdraw_account: account,
            withdraw_method: method,
        };
        self.submit("/user/ticket/withdraw", &body).await
    }

    // ===== Knowledge base =====

    pub async fn fetch_knowledge(&self, language: &str) -> Result<Value> {
        self.fetch("/user/knowledge/fetch", &[("language", language)])
            .await
    }

    pub async fn get_knowledge_article(&self, id: u64, language: &str) -> Result<Value> {
        let id = id.to_string();
        self.fetch(
            "/user/knowledge/fetch",
            &[("id", &id), ("language", language)],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mockito::Matcher;
    use url::Url;

    use crate::auth::{keys, AuthPayload, SessionManager};
    use crate::config::{DeploymentConfig, PanelType};
    use crate::env::Environment;
    use crate::location::MemoryNavigator;
    use crate::storage::{KeyValueStore, MemoryStore};

    struct Fixture {
        client: ApiClient,
        local: Arc<MemoryStore>,
        navigator: Arc<MemoryNavigator>,
    }

    fn fixture(server: &mockito::Server, panel_type: PanelType) -> Fixture {
        crate::init_test_tracing();
        let page = Url::parse("https://panel.example.com/#/tickets").unwrap();
        let local = Arc::new(MemoryStore::new());
        let navigator = Arc::new(MemoryNavigator::new(page.clone()));
        let env = Environment {
            local: local.clone(),
            navigator: navigator.clone(),
            ..Environment::in_memory(page)
        };
        let config = DeploymentConfig {
            site_name: "panel-a".to_string(),
            panel_type,
            api_base_url: server.url(),
            ..DeploymentConfig::default()
        };
        let session = SessionManager::new(&config, env);
        session
            .on_login_success(&AuthPayload::new("t1", "a1"), false)
            .unwrap()
            .cancel();
        Fixture {
            client: ApiClient::new(&config, session).unwrap(),
            local,
            navigator,
        }
    }

    #[tokio::test]
    async fn test_fetch_unwraps_data_and_sends_credential() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/user/plan/fetch")
            .match_header("authorization", "a1")
            .match_query(Matcher::UrlEncoded("id".into(), "3".into()))
            .with_status(200)
            .with_body(r#"{"data":{"id":3,"name":"Pro"}}"#)
            .create_async()
            .await;

        let f = fixture(&server, PanelType::V2board);
        let plan = f.client.fetch_plan(3).await.unwrap();
        assert_eq!(plan, json!({"id": 3, "name": "Pro"}));
    }

    #[tokio::test]
    async fn test_invite_details_pages() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/user/invite/details")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("current".into(), "2".into()),
                Matcher::UrlEncoded("page_size".into(), "10".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"data":[],"total":0}"#)
            .create_async()
            .await;

        let f = fixture(&server, PanelType::V2board);
        assert_eq!(f.client.get_invite_details(2, 10).await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn test_save_order_json_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/user/order/save")
            .match_body(Matcher::Json(json!({"plan_id": 1, "period": "month_price"})))
            .with_status(200)
            .with_body(r#"{"data":"2024010112345"}"#)
            .create_async()
            .await;

        let f = fixture(&server, PanelType::V2board);
        let request = OrderRequest {
            plan_id: 1,
            period: "month_price".to_string(),
            coupon_code: None,
        };
        assert_eq!(f.client.save_order(&request).await.unwrap(), json!("2024010112345"));
    }

    #[tokio::test]
    async fn test_deposit_order_form_body_for_xboard() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/user/order/save")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("period".into(), "deposit".into()),
                Matcher::UrlEncoded("deposit_amount".into(), "1000".into()),
                Matcher::UrlEncoded("plan_id".into(), "0".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"data":"T1"}"#)
            .create_async()
            .await;

        let f = fixture(&server, PanelType::Xboard);
        assert_eq!(f.client.create_deposit_order(1000).await.unwrap(), json!("T1"));
    }

    #[tokio::test]
    async fn test_remind_settings_sent_as_flags() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/user/update")
            .match_body(Matcher::Json(json!({"remind_expire": 1, "remind_traffic": 0})))
            .with_status(200)
            .with_body(r#"{"data":true}"#)
            .create_async()
            .await;

        let f = fixture(&server, PanelType::V2board);
        let settings = RemindSettings {
            remind_expire: true,
            remind_traffic: false,
        };
        assert_eq!(f.client.update_remind_settings(settings).await.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_cancel_order_requires_trade_no() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/user/order/cancel")
            .expect(0)
            .create_async()
            .await;

        let f = fixture(&server, PanelType::V2board);
        assert!(f.client.cancel_order("  ").await.is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_session_on_user_endpoint_logs_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/user/ticket/fetch")
            .with_status(403)
            .with_body(r#"{"message":"未登录或登陆已过期"}"#)
            .create_async()
            .await;

        let f = fixture(&server, PanelType::V2board);
        assert!(f.client.fetch_tickets().await.is_err());
        assert_eq!(f.local.get(keys::TOKEN).unwrap(), None);
        assert_eq!(f.client.session().resolve_auth_header(), None);
        assert_eq!(f.navigator.redirects(), vec!["/#/login".to_string()]);
    }
}
