use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{ConsoleError, Terminal, TerminalFactory};
use crate::channel::{Channel, ChannelError, ChannelId};

/// Where a viewer wants console output delivered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RouteKey {
    pub service: String,
    pub child: String,
}

impl RouteKey {
    pub fn new(service: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            child: child.into(),
        }
    }
}

/// Public view of an open console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleInfo {
    pub name: String,
    pub process: String,
    pub cols: u16,
    pub rows: u16,
    pub routes: Vec<RouteKey>,
}

struct Session {
    process: String,
    cols: u16,
    rows: u16,
    terminal: Arc<dyn Terminal>,
    routes: BTreeMap<RouteKey, Arc<dyn Channel>>,
}

impl Session {
    fn info(&self, name: &str) -> ConsoleInfo {
        ConsoleInfo {
            name: name.to_string(),
            process: self.process.clone(),
            cols: self.cols,
            rows: self.rows,
            routes: self.routes.keys().cloned().collect(),
        }
    }
}

/// Multiplexes named terminal sessions to their viewers.
pub struct ConsoleRouter {
    factory: Option<Arc<dyn TerminalFactory>>,
    sessions: RwLock<BTreeMap<String, Session>>,
}

impl ConsoleRouter {
    /// Router without a terminal factory: every open fails with `Unavailable`.
    pub fn disabled() -> Self {
        Self {
            factory: None,
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn new(factory: Arc<dyn TerminalFactory>) -> Self {
        Self {
            factory: Some(factory),
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Opens console `name` running `process`, optionally attaching a viewer.
    ///
    /// Opening a name that is already open only attaches the viewer; without
    /// a viewer it fails with `AlreadyExists`.
    pub async fn open_console(
        &self,
        name: &str,
        process: &str,
        cols: u16,
        rows: u16,
        viewer: Option<(RouteKey, Arc<dyn Channel>)>,
    ) -> Result<ConsoleInfo, ConsoleError> {
        if self.sessions.read().await.contains_key(name) {
            let Some((key, channel)) = viewer else {
                return Err(ConsoleError::AlreadyExists(name.to_string()));
            };
            self.attach(name, key, channel).await?;
            return self.info(name).await;
        }

        let factory = self.factory.as_ref().ok_or(ConsoleError::Unavailable)?;
        let terminal = factory.open(name, process, cols, rows).await?;
        let mut session = Session {
            process: process.to_string(),
            cols,
            rows,
            terminal,
            routes: BTreeMap::new(),
        };
        if let Some((key, channel)) = viewer {
            session.routes.insert(key, channel);
        }
        let info = session.info(name);

        {
            let mut guard = self.sessions.write().await;
            if guard.contains_key(name) {
                // lost a race with another open of the same name
                session.terminal.close().await;
                return Err(ConsoleError::AlreadyExists(name.to_string()));
            }
            guard.insert(name.to_string(), session);
        }
        info!(console = name, process, cols, rows, "console opened");
        self.notify(name, "EV_TTY_OPEN", &info).await;
        Ok(info)
    }

    /// Adds a viewer route to an open console.
    pub async fn attach(
        &self,
        name: &str,
        key: RouteKey,
        channel: Arc<dyn Channel>,
    ) -> Result<(), ConsoleError> {
        let info = {
            let mut guard = self.sessions.write().await;
            let session = guard
                .get_mut(name)
                .ok_or_else(|| ConsoleError::NotFound(name.to_string()))?;
            session.routes.insert(key.clone(), channel.clone());
            session.info(name)
        };
        debug!(console = name, service = %key.service, child = %key.child, "viewer attached");
        if let Err(e) = channel.send_event("EV_TTY_OPEN", open_payload(&info)).await {
            warn!(console = name, error = %e, "tty open notice not delivered");
        }
        Ok(())
    }

    /// Removes one viewer route. Returns whether it existed.
    pub async fn detach(&self, name: &str, key: &RouteKey) -> Result<bool, ConsoleError> {
        let mut guard = self.sessions.write().await;
        let session = guard
            .get_mut(name)
            .ok_or_else(|| ConsoleError::NotFound(name.to_string()))?;
        Ok(session.routes.remove(key).is_some())
    }

    /// Keyboard input from a viewer.
    pub async fn write_input(&self, name: &str, data: &[u8]) -> Result<(), ConsoleError> {
        let terminal = self.terminal(name).await?;
        terminal.write(data).await
    }

    /// Terminal output: delivered to every route as `EV_TTY_DATA`.
    ///
    /// Returns the number of routes reached.
    pub async fn on_output(&self, name: &str, data: &[u8]) -> Result<usize, ConsoleError> {
        let routes = self.routes(name).await?;
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (key, channel) in routes {
            let payload = json!({
                "name": name,
                "service": key.service,
                "child": key.child,
                "content": data,
            });
            match channel.send_event("EV_TTY_DATA", payload).await {
                Ok(()) => delivered += 1,
                Err(ChannelError::Closed(id)) => {
                    debug!(console = name, channel = %id, "dropping route on closed channel");
                    dead.push(key);
                }
                Err(e) => warn!(console = name, error = %e, "tty data not delivered"),
            }
        }
        if !dead.is_empty() {
            if let Some(session) = self.sessions.write().await.get_mut(name) {
                for key in &dead {
                    session.routes.remove(key);
                }
            }
        }
        Ok(delivered)
    }

    /// Closes the terminal and tells every viewer.
    pub async fn close_console(&self, name: &str) -> Result<(), ConsoleError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(name)
            .ok_or_else(|| ConsoleError::NotFound(name.to_string()))?;
        session.terminal.close().await;
        let payload = json!({"name": name, "process": session.process});
        for channel in session.routes.values() {
            if let Err(e) = channel.send_event("EV_TTY_CLOSE", payload.clone()).await {
                debug!(console = name, error = %e, "tty close notice not delivered");
            }
        }
        info!(console = name, "console closed");
        Ok(())
    }

    pub async fn list_consoles(&self) -> Vec<ConsoleInfo> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(name, s)| s.info(name))
            .collect()
    }

    /// Drops every route on `channel`; consoles left without routes are
    /// closed. Returns the names of the closed consoles.
    pub async fn on_disconnect(&self, channel: ChannelId) -> Vec<String> {
        let orphans: Vec<(String, Arc<dyn Terminal>)> = {
            let mut guard = self.sessions.write().await;
            let mut emptied = Vec::new();
            for (name, session) in guard.iter_mut() {
                let before = session.routes.len();
                session.routes.retain(|_, ch| ch.id() != channel);
                if before > 0 && session.routes.is_empty() {
                    emptied.push(name.clone());
                }
            }
            emptied
                .into_iter()
                .filter_map(|name| guard.remove(&name).map(|s| (name, s.terminal)))
                .collect()
        };

        let mut closed = Vec::with_capacity(orphans.len());
        for (name, terminal) in orphans {
            terminal.close().await;
            info!(console = %name, channel = %channel, "console closed on disconnect");
            closed.push(name);
        }
        closed
    }

    async fn info(&self, name: &str) -> Result<ConsoleInfo, ConsoleError> {
        self.sessions
            .read()
            .await
            .get(name)
            .map(|s| s.info(name))
            .ok_or_else(|| ConsoleError::NotFound(name.to_string()))
    }

    async fn terminal(&self, name: &str) -> Result<Arc<dyn Terminal>, ConsoleError> {
        self.sessions
            .read()
            .await
            .get(name)
            .map(|s| s.terminal.clone())
            .ok_or_else(|| ConsoleError::NotFound(name.to_string()))
    }

    async fn routes(&self, name: &str) -> Result<Vec<(RouteKey, Arc<dyn Channel>)>, ConsoleError> {
        self.sessions
            .read()
            .await
            .get(name)
            .map(|s| {
                s.routes
                    .iter()
                    .map(|(k, ch)| (k.clone(), ch.clone()))
                    .collect()
            })
            .ok_or_else(|| ConsoleError::NotFound(name.to_string()))
    }

    async fn notify(&self, name: &str, event: &str, info: &ConsoleInfo) {
        let Ok(routes) = self.routes(name).await else {
            return;
        };
        for (_, channel) in routes {
            if let Err(e) = channel.send_event(event, open_payload(info)).await {
                warn!(console = name, error = %e, "{event} not delivered");
            }
        }
    }
}

fn open_payload(info: &ConsoleInfo) -> serde_json::Value {
    json!({
        "name": info.name,
        "process": info.process,
        "cols": info.cols,
        "rows": info.rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeChannel, FakeTerminals, Sent};

    fn router() -> (ConsoleRouter, Arc<FakeTerminals>) {
        let terms = Arc::new(FakeTerminals::default());
        (ConsoleRouter::new(terms.clone()), terms)
    }

    fn viewer(child: &str, ch: &Arc<FakeChannel>) -> Option<(RouteKey, Arc<dyn Channel>)> {
        let ch: Arc<dyn Channel> = ch.clone();
        Some((RouteKey::new("cli", child), ch))
    }

    fn data_events(ch: &FakeChannel) -> Vec<serde_json::Value> {
        ch.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Event(name, payload) if name == "EV_TTY_DATA" => Some(payload),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn output_reaches_every_route() {
        let (router, _) = router();
        let a = FakeChannel::new();
        let b = FakeChannel::new();
        router
            .open_console("bash", "/bin/bash", 80, 24, viewer("1", &a))
            .await
            .unwrap();
        router.attach("bash", RouteKey::new("cli", "2"), b.clone()).await.unwrap();

        assert_eq!(router.on_output("bash", b"ls\r\n").await.unwrap(), 2);
        let got = data_events(&a);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["child"], "1");
        assert_eq!(got[0]["content"], json!(b"ls\r\n".to_vec()));
        assert_eq!(data_events(&b)[0]["child"], "2");
    }

    #[tokio::test]
    async fn input_goes_to_terminal() {
        let (router, terms) = router();
        router.open_console("bash", "/bin/bash", 80, 24, None).await.unwrap();
        router.write_input("bash", b"echo hi\n").await.unwrap();
        assert_eq!(terms.get("bash").unwrap().input(), b"echo hi\n".to_vec());
    }

    #[tokio::test]
    async fn reopen_without_viewer_is_rejected() {
        let (router, _) = router();
        router.open_console("bash", "/bin/bash", 80, 24, None).await.unwrap();
        let err = router
            .open_console("bash", "/bin/bash", 80, 24, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::AlreadyExists(_)));

        let ch = FakeChannel::new();
        let info = router
            .open_console("bash", "/bin/sh", 80, 24, viewer("9", &ch))
            .await
            .unwrap();
        assert_eq!(info.process, "/bin/bash");
        assert_eq!(info.routes, vec![RouteKey::new("cli", "9")]);
    }

    #[tokio::test]
    async fn closed_channel_route_is_dropped() {
        let (router, _) = router();
        let a = FakeChannel::new();
        let b = FakeChannel::new();
        router
            .open_console("bash", "/bin/bash", 80, 24, viewer("1", &a))
            .await
            .unwrap();
        router.attach("bash", RouteKey::new("cli", "2"), b.clone()).await.unwrap();
        b.close();

        assert_eq!(router.on_output("bash", b"x").await.unwrap(), 1);
        let info = &router.list_consoles().await[0];
        assert_eq!(info.routes, vec![RouteKey::new("cli", "1")]);
    }

    #[tokio::test]
    async fn disconnect_closes_orphaned_consoles() {
        let (router, terms) = router();
        let a = FakeChannel::new();
        let b = FakeChannel::new();
        router
            .open_console("one", "/bin/bash", 80, 24, viewer("1", &a))
            .await
            .unwrap();
        router
            .open_console("two", "/bin/bash", 80, 24, viewer("2", &a))
            .await
            .unwrap();
        router.attach("two", RouteKey::new("cli", "3"), b.clone()).await.unwrap();

        assert_eq!(router.on_disconnect(a.id()).await, vec!["one".to_string()]);
        assert!(terms.get("one").unwrap().is_closed());
        assert!(!terms.get("two").unwrap().is_closed());
        let left = router.list_consoles().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].routes, vec![RouteKey::new("cli", "3")]);
    }

    #[tokio::test]
    async fn close_notifies_viewers() {
        let (router, terms) = router();
        let a = FakeChannel::new();
        router
            .open_console("bash", "/bin/bash", 80, 24, viewer("1", &a))
            .await
            .unwrap();
        router.close_console("bash").await.unwrap();

        assert!(terms.get("bash").unwrap().is_closed());
        assert!(matches!(a.sent().last(), Some(Sent::Event(name, _)) if name == "EV_TTY_CLOSE"));
        assert!(matches!(
            router.write_input("bash", b"x").await,
            Err(ConsoleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn disabled_router_cannot_open() {
        let router = ConsoleRouter::disabled();
        let err = router
            .open_console("bash", "/bin/bash", 80, 24, None)
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "console_unavailable");
    }
}
