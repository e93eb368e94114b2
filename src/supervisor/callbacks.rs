//! Inbound worker traffic: identity check on open, cleanup on close, acks.

use std::sync::Arc;

use nix::sys::signal::Signal;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{Outcome, WorkerSupervisor};
use crate::channel::{Channel, ChannelId, IdentityCard};
use crate::error::AgentError;
use crate::events::{Event, EventKind};
use crate::resources::{ResourceKind, Yuno};
use crate::store::WriteMode;

/// First field of `card` that disagrees with `yuno`.
fn mismatch(yuno: &Yuno, card: &IdentityCard) -> Option<(&'static str, String, String)> {
    let pairs = [
        ("yuno_role", &yuno.yuno_role, &card.yuno_role),
        ("yuno_name", &yuno.yuno_name, &card.yuno_name),
        ("yuno_release", &yuno.yuno_release, &card.yuno_release),
        ("realm_id", &yuno.realm_id, &card.realm_id),
    ];
    pairs
        .into_iter()
        .find(|(_, want, got)| want != got)
        .map(|(field, want, got)| (field, want.clone(), got.clone()))
}

impl WorkerSupervisor {
    /// A launched worker connected back and presented its identity card.
    ///
    /// Unknown ids and mismatching cards are rejected: the reporting pid gets
    /// `SIGKILL`, `YunoRejected` is published, the record is left untouched
    /// and the channel is not kept. Accepted channels are bound to the yuno.
    pub async fn on_open(
        &self,
        channel: Arc<dyn Channel>,
        card: IdentityCard,
    ) -> Result<Yuno, AgentError> {
        let verdict = match self.graph.get_by_id::<Yuno>(&card.yuno_id).await? {
            None => Err(AgentError::not_found(ResourceKind::Yuno, &card.yuno_id)),
            Some(yuno) => match mismatch(&yuno, &card) {
                Some((field, expected, got)) => Err(AgentError::IntegrityViolation {
                    yuno_id: card.yuno_id.clone(),
                    field,
                    expected,
                    got,
                }),
                None => Ok(yuno),
            },
        };
        let mut yuno = match verdict {
            Ok(y) => y,
            Err(e) => {
                self.reject(&card, &e).await;
                return Err(e);
            }
        };

        yuno.running = true;
        yuno.playing = card.playing;
        yuno.pid = card.pid;
        yuno.watcher_pid = card.watcher_pid;
        yuno.channel = Some(channel.id());
        let yuno = self.graph.update(&yuno, WriteMode::Volatile).await?;
        self.bind_channel(channel.clone(), &yuno.id).await;

        info!(yuno_id = %yuno.id, pid = card.pid, channel = %channel.id(), "yuno opened");
        self.bus.publish(
            Event::new(EventKind::YunoOpened)
                .with_yuno(yuno.id.as_str())
                .with_kw(json!({"yuno_id": yuno.id, "identity_card": card})),
        );

        if yuno.must_play && !card.playing {
            match self.play(&yuno.id).await {
                Ok(Outcome::Done) => debug!(yuno_id = %yuno.id, "replayed latched play"),
                Ok(other) => debug!(yuno_id = %yuno.id, outcome = %other, "latched play not sent"),
                Err(e) => warn!(yuno_id = %yuno.id, error = %e.as_message(), "latched play failed"),
            }
        }
        self.fetch(&yuno.id).await
    }

    async fn reject(&self, card: &IdentityCard, why: &AgentError) {
        warn!(yuno_id = %card.yuno_id, pid = card.pid, reason = %why.as_message(), "identity card rejected");
        if card.pid != 0 {
            if let Err(e) = self.process.signal(card.pid, Signal::SIGKILL).await {
                debug!(pid = card.pid, error = %e, "kill of rejected process failed");
            }
        }
        self.bus.publish(
            Event::new(EventKind::YunoRejected)
                .with_yuno(card.yuno_id.as_str())
                .with_reason(why.as_message())
                .with_kw(json!({"yuno_id": card.yuno_id, "identity_card": card})),
        );
    }

    /// A connection went away. Returns the yuno it belonged to, if any.
    pub async fn on_close(&self, id: ChannelId) -> Result<Option<String>, AgentError> {
        let slot = self.channels.write().await.remove(&id);
        let Some(yuno_id) = slot.and_then(|s| s.yuno_id) else {
            debug!(channel = %id, "closed channel had no yuno");
            return Ok(None);
        };
        if let Some(yuno) = self.graph.get_by_id::<Yuno>(&yuno_id).await? {
            info!(yuno_id = %yuno.id, channel = %id, "yuno closed");
            self.mark_closed(yuno).await?;
        }
        Ok(Some(yuno_id))
    }

    /// The worker on `id` acknowledged `play_yuno`.
    pub async fn on_play_ack(&self, id: ChannelId) -> Result<(), AgentError> {
        self.apply_ack(id, true).await
    }

    /// The worker on `id` acknowledged `pause_yuno`.
    pub async fn on_pause_ack(&self, id: ChannelId) -> Result<(), AgentError> {
        self.apply_ack(id, false).await
    }

    async fn apply_ack(&self, id: ChannelId, playing: bool) -> Result<(), AgentError> {
        let Some(yuno_id) = self.yuno_of(id).await else {
            debug!(channel = %id, playing, "ack on detached channel ignored");
            return Ok(());
        };
        let mut yuno = self.fetch(&yuno_id).await?;
        yuno.playing = playing;
        self.graph.update(&yuno, WriteMode::Volatile).await?;

        let kind = if playing {
            EventKind::YunoPlayed
        } else {
            EventKind::YunoPaused
        };
        self.bus.publish(
            Event::new(kind)
                .with_yuno(yuno_id.as_str())
                .with_kw(json!({"yuno_id": yuno_id})),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeChannel, Rig};

    #[tokio::test]
    async fn matching_card_marks_running() {
        let rig = Rig::new().await;
        let y = rig.yuno("emailsender", "mail").await;
        rig.supervisor.run(&y.id).await.unwrap();
        let mut rx = rig.bus.subscribe();

        let ch = FakeChannel::new();
        let mut card = rig.card(&y.id).await;
        card.watcher_pid = 55;
        let opened = rig.supervisor.on_open(ch.clone(), card).await.unwrap();

        assert!(opened.running);
        assert_eq!(opened.watcher_pid, 55);
        assert_eq!(opened.channel, Some(ch.id()));
        assert_eq!(rig.supervisor.yuno_of(ch.id()).await, Some(y.id.clone()));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::YunoOpened);
        assert_eq!(ev.lookup("identity_card.yuno_id"), Some(&json!(y.id)));
    }

    #[tokio::test]
    async fn mismatching_card_is_killed_and_rejected() {
        let rig = Rig::new().await;
        let y = rig.yuno("emailsender", "mail").await;
        rig.supervisor.run(&y.id).await.unwrap();
        let mut rx = rig.bus.subscribe();

        let mut card = rig.card(&y.id).await;
        card.yuno_release = "9.9-9".into();
        card.pid = 4242;
        let ch = FakeChannel::new();
        let err = rig.supervisor.on_open(ch.clone(), card).await.unwrap_err();

        match err {
            AgentError::IntegrityViolation { field, .. } => assert_eq!(field, "yuno_release"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rig.supervisor.channel(ch.id()).await.is_none());
        assert_eq!(rig.process.signalled(), vec![(4242, Signal::SIGKILL)]);
        assert!(!rig.fetch(&y.id).await.running);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::YunoRejected);
    }

    #[tokio::test]
    async fn unknown_yuno_is_rejected() {
        let rig = Rig::new().await;
        let card = IdentityCard {
            yuno_id: "ghost".into(),
            pid: 7,
            watcher_pid: 0,
            yuno_role: "x".into(),
            yuno_name: "y".into(),
            yuno_release: "1-1".into(),
            realm_id: rig.realm.id.clone(),
            playing: false,
        };
        let ch = FakeChannel::new();
        let err = rig.supervisor.on_open(ch.clone(), card).await.unwrap_err();
        assert_eq!(err.as_label(), "not_found");
        assert!(rig.supervisor.channel(ch.id()).await.is_none());
        assert_eq!(rig.process.signalled(), vec![(7, Signal::SIGKILL)]);
    }

    #[tokio::test]
    async fn already_playing_card_is_not_replayed() {
        let rig = Rig::new().await;
        let y = rig.yuno("emailsender", "mail").await;
        rig.supervisor.run(&y.id).await.unwrap();
        rig.supervisor.play(&y.id).await.unwrap();

        let ch = FakeChannel::new();
        let mut card = rig.card(&y.id).await;
        card.playing = true;
        let opened = rig.supervisor.on_open(ch.clone(), card).await.unwrap();
        assert!(opened.playing);
        assert!(ch.commands().is_empty());
    }

    #[tokio::test]
    async fn close_clears_runtime_fields() {
        let rig = Rig::new().await;
        let y = rig.yuno("emailsender", "mail").await;
        let ch = rig.start(&y.id).await;
        let mut rx = rig.bus.subscribe();

        assert_eq!(rig.supervisor.on_close(ch.id()).await.unwrap(), Some(y.id.clone()));
        let after = rig.fetch(&y.id).await;
        assert!(!after.running && !after.playing);
        assert_eq!(after.pid, 0);
        assert_eq!(after.channel, None);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::YunoClosed);
    }

    #[tokio::test]
    async fn close_of_plain_connection_touches_no_yuno() {
        let rig = Rig::new().await;
        let ch = FakeChannel::new();
        rig.supervisor.register_channel(ch.clone()).await;
        assert_eq!(rig.supervisor.on_close(ch.id()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn acks_publish_played_and_paused() {
        let rig = Rig::new().await;
        let y = rig.yuno("emailsender", "mail").await;
        let ch = rig.start(&y.id).await;
        let mut rx = rig.bus.subscribe();

        rig.supervisor.on_play_ack(ch.id()).await.unwrap();
        rig.supervisor.on_pause_ack(ch.id()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::YunoPlayed);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::YunoPaused);
    }
}
