/// Desktop notifications over `org.freedesktop.Notifications`.
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use zbus::zvariant::Value;
use zbus::{proxy, Connection};

use super::Notifier;

const APP_NAME: &str = "Text Extractor";
const APP_ICON: &str = "edit-select-all-symbolic";

#[proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications",
    gen_blocking = false
)]
trait Notifications {
    fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: &[&str],
        hints: HashMap<&str, Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;
}

pub struct DesktopNotifier {
    conn: Connection,
}

impl DesktopNotifier {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<()> {
        let proxy = NotificationsProxy::new(&self.conn).await?;
        proxy
            .notify(APP_NAME, 0, APP_ICON, title, body, &[], HashMap::new(), -1)
            .await?;
        Ok(())
    }
}
