//! Serialized dispatcher.
//!
//! A single worker drains jobs strictly in arrival order and awaits every
//! platform call a job makes before starting the next one. All identity
//! transitions and GeoIP lookups happen here, so they observe events in the
//! order the game printed them.
//!
//! Handle collisions are retried as synthetic jobs queued behind everything
//! already submitted, keeping the total order with other clients' traffic.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::geoip::GeoIpCache;
use crate::bridge::registry::{
    CollisionOutcome, Identity, IdentityRegistry, IdentityState, OwnedHandles, DEFAULT_MAX_HANDLE_RETRIES,
};
use crate::bridge::relay::{Author, ChatPlatform, SessionId};
use crate::bridge::sanitize::ChatEscaper;
use crate::common::error::{BridgeError, BridgeResult, PlatformError};
use crate::common::types::{ClientId, Event, MasterOp};
use crate::config::types::Config;
use crate::game::formatter::{split_message, EventFormats, FormatContext, MAX_CHAT_MESSAGE_LEN};

/// Posted through the bridge's own handle when a client could not get any handle.
const COLLISION_NOTICE: &str = "could not be bridged: every handle tried was already taken";

/// One unit of ordered work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Event(Event),
    /// Retry a collided handle with the next suffix.
    RetryHandle { client_id: ClientId },
}

impl Job {
    fn label(&self) -> String {
        match self {
            Job::Event(event) => match event.client_id() {
                Some(id) => format!("{}({})", event.kind(), id),
                None => event.kind().to_string(),
            },
            Job::RetryHandle { client_id } => format!("retry({})", client_id),
        }
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Jobs buffered before `submit` starts applying backpressure.
    pub queue_capacity: usize,
    /// Per-job deadline; `None` lets a hung platform call stall the queue.
    pub job_timeout: Option<Duration>,
    pub max_handle_retries: u32,
    pub geoip_ttl: Option<Duration>,
    pub geoip_capacity: usize,
    pub strict_escaping: bool,
    pub formats: EventFormats,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            job_timeout: None,
            max_handle_retries: DEFAULT_MAX_HANDLE_RETRIES,
            geoip_ttl: Some(Duration::from_secs(60)),
            geoip_capacity: 256,
            strict_escaping: false,
            formats: EventFormats::default(),
        }
    }
}

impl DispatcherOptions {
    pub fn from_config(config: &Config) -> Self {
        let bridge = &config.bridge;
        Self {
            queue_capacity: bridge.queue_capacity.max(1),
            job_timeout: bridge.job_timeout_secs.map(Duration::from_secs),
            max_handle_retries: bridge.max_handle_retries,
            geoip_ttl: bridge.geoip_ttl_secs.map(Duration::from_secs),
            geoip_capacity: bridge.geoip_capacity,
            strict_escaping: bridge.escape_all_game_input,
            formats: EventFormats::from_config(config.formats.as_ref()),
        }
    }
}

/// Submits events to the dispatcher. Dropping every handle ends the run.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Job>,
}

impl DispatcherHandle {
    /// Queue an event, waiting for room if the queue is full.
    pub async fn submit(&self, event: Event) -> BridgeResult<()> {
        if let Event::Unrecognized { raw } = event {
            return Err(BridgeError::MalformedInput { line: raw });
        }
        self.tx
            .send(Job::Event(event))
            .await
            .map_err(|_| BridgeError::QueueClosed)
    }
}

pub struct Dispatcher {
    rx: mpsc::Receiver<Job>,
    /// Jobs pulled off the channel ahead of a synthetic retry.
    deferred: VecDeque<Job>,
    registry: IdentityRegistry,
    geoip: GeoIpCache,
    formats: EventFormats,
    escaper: ChatEscaper,
    platform: Arc<dyn ChatPlatform>,
    job_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(platform: Arc<dyn ChatPlatform>, options: DispatcherOptions) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let registry = IdentityRegistry::new(&platform.primary_handle(), options.max_handle_retries);

        let dispatcher = Self {
            rx,
            deferred: VecDeque::new(),
            registry,
            geoip: GeoIpCache::new(options.geoip_ttl, options.geoip_capacity),
            formats: options.formats,
            escaper: ChatEscaper::new(options.strict_escaping),
            platform,
            job_timeout: options.job_timeout,
        };
        (dispatcher, DispatcherHandle { tx })
    }

    /// Handles controlled by the bridge, for inbound echo suppression.
    pub fn owned_handles(&self) -> OwnedHandles {
        self.registry.owned_handles()
    }

    /// Drain jobs until every handle is dropped, then close all live sessions.
    pub async fn run(mut self) {
        info!("Dispatcher started");

        while let Some(job) = self.next_job().await {
            let label = job.label();
            let result = match self.job_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.run_job(job)).await {
                    Ok(result) => result,
                    Err(_) => Err(BridgeError::Timeout {
                        secs: limit.as_secs(),
                    }),
                },
                None => self.run_job(job).await,
            };

            if let Err(e) = result {
                warn!("Job {} failed: {}", label, e);
            }
        }

        self.close_all_sessions().await;
        info!("Dispatcher stopped");
    }

    async fn next_job(&mut self) -> Option<Job> {
        if let Some(job) = self.deferred.pop_front() {
            return Some(job);
        }
        self.rx.recv().await
    }

    /// Queue a retry behind every job submitted so far.
    fn enqueue_retry(&mut self, client_id: ClientId) {
        while let Ok(job) = self.rx.try_recv() {
            self.deferred.push_back(job);
        }
        self.deferred.push_back(Job::RetryHandle { client_id });
    }

    async fn run_job(&mut self, job: Job) -> BridgeResult<()> {
        match job {
            Job::Event(event) => self.handle_event(event).await,
            Job::RetryHandle { client_id } => self.handle_retry(client_id).await,
        }
    }

    async fn handle_event(&mut self, event: Event) -> BridgeResult<()> {
        match event {
            Event::Chat {
                author,
                client_id,
                message,
            } => self.on_chat(&author, client_id, &message).await,
            Event::Connect { client_id, name } => self.on_connect(client_id, &name).await,
            Event::Disconnect { client_id, name } => self.on_disconnect(client_id, &name).await,
            Event::GeoIp {
                client_id,
                location,
            } => {
                self.geoip.insert(client_id, location);
                debug!("Client {} located, {} locations pending", client_id, self.geoip.len());
                Ok(())
            }
            Event::MasterChange {
                name,
                op,
                privilege,
            } => self.on_master(&name, op, &privilege).await,
            Event::Rename {
                client_id,
                old_name,
                new_name,
            } => self.on_rename(client_id, &old_name, &new_name).await,
            Event::Kick { actor, target } => self.on_kick(&actor, &target).await,
            Event::Unrecognized { raw } => Err(BridgeError::MalformedInput { line: raw }),
        }
    }

    // ========================================================================
    // Event handlers
    // ========================================================================

    async fn on_chat(&mut self, author: &str, client_id: ClientId, message: &str) -> BridgeResult<()> {
        let Some(session) = self.registry.live_session(client_id) else {
            debug!("Dropping chat from {} ({}): no live identity", author, client_id);
            return Ok(());
        };

        let ctx = FormatContext::message(self.escaper.escape(message));
        let text = self.formats.chat.format(&ctx);
        self.post(Author::Session(session), &text).await
    }

    async fn on_connect(&mut self, client_id: ClientId, name: &str) -> BridgeResult<()> {
        let location = self.take_location(client_id);
        let ctx = FormatContext::default()
            .with_action("joined")
            .with_location(location);
        let greeting = self.formats.connect.format(&ctx);

        let candidate = self.registry.begin_connect(client_id, name, Some(greeting))?;
        self.open_identity(client_id, &candidate).await
    }

    async fn on_disconnect(&mut self, client_id: ClientId, name: &str) -> BridgeResult<()> {
        let location = self.take_location(client_id);

        let Some(identity) = self.registry.remove(client_id) else {
            debug!("Disconnect for {} ({}) with no identity", name, client_id);
            return Ok(());
        };
        let Some(session) = identity.session else {
            debug!("Client {} left before its identity was established", client_id);
            return Ok(());
        };

        // Close before the farewell so a stalled post cannot leave the handle taken.
        let closed = self.platform.close_session(session).await;
        info!("Client {} ('{}') left the bridge", client_id, identity.handle);

        let ctx = FormatContext::default()
            .with_action("left")
            .with_location(location);
        let farewell = self.formats.disconnect.format(&ctx);
        let announced = self.post(Author::Display(&identity.handle), &farewell).await;

        closed?;
        announced
    }

    async fn on_master(&mut self, name: &str, op: MasterOp, privilege: &str) -> BridgeResult<()> {
        let ctx = FormatContext::default()
            .with_op(op.as_str())
            .with_privilege(self.escaper.escape(privilege));
        let text = self.formats.master.format(&ctx);
        self.post_as_name(name, &text).await
    }

    async fn on_kick(&mut self, actor: &str, target: &str) -> BridgeResult<()> {
        let ctx = FormatContext::default().with_target(self.escaper.escape(target));
        let text = self.formats.kick.format(&ctx);
        self.post_as_name(actor, &text).await
    }

    async fn on_rename(&mut self, client_id: ClientId, old_name: &str, new_name: &str) -> BridgeResult<()> {
        let Some(identity) = self.registry.get(client_id) else {
            return Err(BridgeError::IdentityNotFound { client_id });
        };
        // no session yet while the first handle is still being retried
        let speaker = identity.live_session();

        let ctx = FormatContext::default().with_new_name(self.escaper.escape(new_name));
        let text = self.formats.rename.format(&ctx);
        let announced = match speaker {
            Some(session) => self.post(Author::Session(session), &text).await,
            None => self.post(Author::Display(old_name), &text).await,
        };

        debug!("Client {} renaming from '{}' to '{}'", client_id, old_name, new_name);
        // None when a retry is in flight; it picks up the new name
        if let Some((session, candidate)) = self.registry.begin_rename(client_id, new_name)? {
            self.rename_identity(client_id, session, &candidate).await?;
        }

        announced
    }

    async fn handle_retry(&mut self, client_id: ClientId) -> BridgeResult<()> {
        let Some(identity) = self.registry.get(client_id) else {
            debug!("Dropping handle retry for client {}: identity gone", client_id);
            return Ok(());
        };
        if identity.state != IdentityState::Renaming {
            return Ok(());
        }

        let candidate = identity.candidate();
        let session = identity.session;
        match session {
            None => self.open_identity(client_id, &candidate).await,
            Some(session) => self.rename_identity(client_id, session, &candidate).await,
        }
    }

    // ========================================================================
    // Identity transitions
    // ========================================================================

    async fn open_identity(&mut self, client_id: ClientId, candidate: &str) -> BridgeResult<()> {
        match self.platform.open_session(candidate).await {
            Ok(session) => {
                let greeting = self.registry.activate(client_id, session, candidate)?;
                info!(
                    "Client {} bridged as '{}' ({}), {} identities live",
                    client_id,
                    candidate,
                    session,
                    self.registry.len()
                );
                if let Some(greeting) = greeting {
                    self.post(Author::Session(session), &greeting).await?;
                }
                Ok(())
            }
            Err(PlatformError::HandleTaken { handle }) => self.on_collision(client_id, &handle).await,
            Err(e) => {
                self.registry.remove(client_id);
                Err(e.into())
            }
        }
    }

    async fn rename_identity(
        &mut self,
        client_id: ClientId,
        session: SessionId,
        candidate: &str,
    ) -> BridgeResult<()> {
        let unchanged = self
            .registry
            .get(client_id)
            .is_some_and(|i| i.handle == candidate);
        if unchanged {
            return self.registry.complete_rename(client_id, candidate);
        }

        match self.platform.rename_session(session, candidate).await {
            Ok(()) => {
                info!("Client {} is now '{}'", client_id, candidate);
                self.registry.complete_rename(client_id, candidate)
            }
            Err(PlatformError::HandleTaken { handle }) => self.on_collision(client_id, &handle).await,
            Err(e) => {
                self.registry.abort_rename(client_id)?;
                Err(e.into())
            }
        }
    }

    async fn on_collision(&mut self, client_id: ClientId, handle: &str) -> BridgeResult<()> {
        match self.registry.record_collision(client_id)? {
            CollisionOutcome::Retry { candidate, attempt } => {
                debug!(
                    "Handle '{}' taken for client {}, retry {} as '{}'",
                    handle, client_id, attempt, candidate
                );
                self.enqueue_retry(client_id);
                Ok(())
            }
            CollisionOutcome::Exhausted { attempts } => {
                let has_session = self
                    .registry
                    .get(client_id)
                    .is_some_and(|i| i.session.is_some());

                if has_session {
                    self.registry.abort_rename(client_id)?;
                } else if let Some(identity) = self.registry.remove(client_id) {
                    if let Err(e) = self
                        .platform
                        .send_outbound(Author::Display(&identity.game_name), COLLISION_NOTICE)
                        .await
                    {
                        warn!("Failed to post collision notice for client {}: {}", client_id, e);
                    }
                }

                Err(BridgeError::IdentityCollision {
                    client_id,
                    handle: handle.to_string(),
                    attempts,
                })
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn take_location(&mut self, client_id: ClientId) -> Option<String> {
        self.geoip
            .take(client_id)
            .map(|location| self.escaper.escape(&location))
    }

    /// Post as the live identity with this game name, or as the bare name.
    async fn post_as_name(&self, name: &str, text: &str) -> BridgeResult<()> {
        let session = self
            .registry
            .find_by_game_name(name)
            .and_then(Identity::live_session);

        match session {
            Some(session) => self.post(Author::Session(session), text).await,
            None => self.post(Author::Display(name), text).await,
        }
    }

    async fn post(&self, author: Author<'_>, text: &str) -> BridgeResult<()> {
        for chunk in split_message(text, MAX_CHAT_MESSAGE_LEN) {
            self.platform.send_outbound(author, &chunk).await?;
        }
        Ok(())
    }

    async fn close_all_sessions(&mut self) {
        let identities = self.registry.drain();
        if identities.is_empty() {
            return;
        }

        info!("Closing {} chat sessions", identities.len());
        for identity in identities {
            if let Some(session) = identity.session {
                if let Err(e) = self.platform.close_session(session).await {
                    warn!("Failed to close session for client {}: {}", identity.client_id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::relay::mock::{Call, MockPlatform};

    fn setup(max_retries: u32) -> (Dispatcher, DispatcherHandle, Arc<MockPlatform>) {
        let platform = Arc::new(MockPlatform::new());
        let options = DispatcherOptions {
            max_handle_retries: max_retries,
            geoip_ttl: None,
            ..Default::default()
        };
        let (dispatcher, handle) = Dispatcher::new(platform.clone(), options);
        (dispatcher, handle, platform)
    }

    fn connect(id: ClientId, name: &str) -> Event {
        Event::Connect {
            client_id: id,
            name: name.to_string(),
        }
    }

    fn disconnect(id: ClientId, name: &str) -> Event {
        Event::Disconnect {
            client_id: id,
            name: name.to_string(),
        }
    }

    fn chat(id: ClientId, author: &str, message: &str) -> Event {
        Event::Chat {
            author: author.to_string(),
            client_id: id,
            message: message.to_string(),
        }
    }

    /// Process everything queued so far, including synthetic retries.
    async fn drain(dispatcher: &mut Dispatcher) {
        loop {
            let job = match dispatcher.deferred.pop_front() {
                Some(job) => job,
                None => match dispatcher.rx.try_recv() {
                    Ok(job) => job,
                    Err(_) => break,
                },
            };
            let _ = dispatcher.run_job(job).await;
        }
    }

    #[tokio::test]
    async fn test_connect_without_geoip_creates_active_identity() {
        let (mut dispatcher, _handle, platform) = setup(5);

        dispatcher.handle_event(connect(9, "Alice")).await.unwrap();

        assert!(dispatcher.registry.get(9).unwrap().is_active());
        assert!(dispatcher.owned_handles().contains("Alice"));
        assert_eq!(
            platform.calls(),
            vec![
                Call::Open("Alice".to_string()),
                Call::Send("Alice".to_string(), "joined".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_geoip_consumed_once_on_connect() {
        let (mut dispatcher, _handle, platform) = setup(5);

        dispatcher
            .handle_event(Event::GeoIp {
                client_id: 5,
                location: "FR".to_string(),
            })
            .await
            .unwrap();
        assert!(dispatcher.geoip.contains(5));

        dispatcher.handle_event(connect(5, "Pierre")).await.unwrap();
        assert!(!dispatcher.geoip.contains(5));
        assert_eq!(
            platform.sends(),
            vec![("Pierre".to_string(), "joined from FR".to_string())]
        );

        dispatcher.handle_event(connect(7, "Other")).await.unwrap();
        assert_eq!(
            platform.sends()[1],
            ("Other".to_string(), "joined".to_string())
        );
    }

    #[tokio::test]
    async fn test_chat_is_escaped_and_attributed() {
        let (mut dispatcher, _handle, platform) = setup(5);
        dispatcher.handle_event(connect(3, "Bob")).await.unwrap();

        dispatcher
            .handle_event(chat(3, "Bob", r#"hello "world""#))
            .await
            .unwrap();

        assert_eq!(
            platform.sends().last().unwrap(),
            &("Bob".to_string(), r#"hello \"world\""#.to_string())
        );
    }

    #[tokio::test]
    async fn test_chat_without_identity_is_dropped() {
        let (mut dispatcher, _handle, platform) = setup(5);
        dispatcher.handle_event(chat(4, "Ghost", "boo")).await.unwrap();
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_destroys_identity() {
        let (mut dispatcher, _handle, platform) = setup(5);
        dispatcher.handle_event(connect(9, "Alice")).await.unwrap();
        dispatcher.handle_event(disconnect(9, "Alice")).await.unwrap();

        assert!(dispatcher.registry.get(9).is_none());
        assert!(!dispatcher.owned_handles().contains("Alice"));
        assert!(platform.open_sessions().is_empty());
        assert_eq!(
            platform.calls()[2..],
            [
                Call::Close("Alice".to_string()),
                Call::Send("~Alice".to_string(), "left".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stalled_farewell_still_frees_handle() {
        let platform = Arc::new(MockPlatform::new());
        let options = DispatcherOptions {
            job_timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        let (dispatcher, handle) = Dispatcher::new(platform.clone(), options);

        platform.delay_send("left", Duration::from_millis(200));
        handle.submit(connect(1, "Alice")).await.unwrap();
        handle.submit(disconnect(1, "Alice")).await.unwrap();
        handle.submit(connect(3, "Alice")).await.unwrap();
        drop(handle);

        dispatcher.run().await;

        // client 3 gets the freed handle, not a suffixed one
        assert_eq!(
            platform.calls(),
            vec![
                Call::Open("Alice".to_string()),
                Call::Send("Alice".to_string(), "joined".to_string()),
                Call::Close("Alice".to_string()),
                Call::Open("Alice".to_string()),
                Call::Send("Alice".to_string(), "joined".to_string()),
                Call::Close("Alice".to_string()),
            ]
        );
        assert!(platform.open_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_for_absent_client_is_noop() {
        let (mut dispatcher, _handle, platform) = setup(5);
        dispatcher.handle_event(disconnect(1, "Nobody")).await.unwrap();
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_second_connect_for_live_client_fails_job() {
        let (mut dispatcher, _handle, platform) = setup(5);
        dispatcher.handle_event(connect(1, "A")).await.unwrap();

        let result = dispatcher.handle_event(connect(1, "A")).await;
        assert!(matches!(result, Err(BridgeError::AlreadyLive { client_id: 1 })));
        assert_eq!(platform.open_sessions(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_collision_retries_with_deterministic_handle() {
        let (mut dispatcher, _handle, platform) = setup(5);
        platform.take_handle("Alice");

        dispatcher.handle_event(connect(9, "Alice")).await.unwrap();
        assert_eq!(dispatcher.registry.get(9).unwrap().state, IdentityState::Renaming);
        assert!(!dispatcher.owned_handles().contains("Alice"));

        drain(&mut dispatcher).await;

        let identity = dispatcher.registry.get(9).unwrap();
        assert!(identity.is_active());
        assert_eq!(identity.handle, "Alice_");
        let owned = dispatcher.owned_handles();
        assert!(owned.contains("Alice_"));
        assert!(!owned.contains("Alice"));
        assert_eq!(owned.len(), 2);
        assert_eq!(
            platform.sends(),
            vec![("Alice_".to_string(), "joined".to_string())]
        );
    }

    #[tokio::test]
    async fn test_retry_queued_behind_pending_jobs() {
        let (mut dispatcher, handle, platform) = setup(5);
        platform.take_handle("Alice");

        handle.submit(connect(9, "Alice")).await.unwrap();
        handle.submit(connect(2, "Bob")).await.unwrap();
        drain(&mut dispatcher).await;

        assert_eq!(
            platform.calls(),
            vec![
                Call::Open("Bob".to_string()),
                Call::Send("Bob".to_string(), "joined".to_string()),
                Call::Open("Alice_".to_string()),
                Call::Send("Alice_".to_string(), "joined".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_collision_exhaustion_is_terminal() {
        let (mut dispatcher, _handle, platform) = setup(2);
        for taken in ["Alice", "Alice_", "Alice__"] {
            platform.take_handle(taken);
        }

        dispatcher.handle_event(connect(9, "Alice")).await.unwrap();
        drain(&mut dispatcher).await;

        assert!(dispatcher.registry.get(9).is_none());
        assert_eq!(dispatcher.owned_handles().len(), 1);
        assert_eq!(
            platform.sends(),
            vec![("~Alice".to_string(), COLLISION_NOTICE.to_string())]
        );
    }

    #[tokio::test]
    async fn test_disconnect_while_retry_pending() {
        let (mut dispatcher, handle, platform) = setup(5);
        platform.take_handle("Alice");

        handle.submit(connect(9, "Alice")).await.unwrap();
        handle.submit(disconnect(9, "Alice")).await.unwrap();
        drain(&mut dispatcher).await;

        assert!(dispatcher.registry.is_empty());
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rename_announces_then_renames() {
        let (mut dispatcher, _handle, platform) = setup(5);
        dispatcher.handle_event(connect(2, "unnamed")).await.unwrap();

        dispatcher
            .handle_event(Event::Rename {
                client_id: 2,
                old_name: "unnamed".to_string(),
                new_name: "Carol".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            platform.calls()[2..],
            [
                Call::Send("unnamed".to_string(), "is now known as Carol".to_string()),
                Call::Rename("unnamed".to_string(), "Carol".to_string()),
            ]
        );
        assert!(dispatcher.owned_handles().contains("Carol"));
        assert!(!dispatcher.owned_handles().contains("unnamed"));
    }

    #[tokio::test]
    async fn test_rename_collision_retries() {
        let (mut dispatcher, _handle, platform) = setup(5);
        platform.take_handle("Carol");
        dispatcher.handle_event(connect(2, "unnamed")).await.unwrap();

        dispatcher
            .handle_event(Event::Rename {
                client_id: 2,
                old_name: "unnamed".to_string(),
                new_name: "Carol".to_string(),
            })
            .await
            .unwrap();
        // old handle still owned while the retry is pending
        assert!(dispatcher.owned_handles().contains("unnamed"));

        drain(&mut dispatcher).await;
        assert_eq!(dispatcher.registry.get(2).unwrap().handle, "Carol_");
        assert!(!dispatcher.owned_handles().contains("unnamed"));
    }

    #[tokio::test]
    async fn test_chat_during_rename_retry_uses_old_handle() {
        let (mut dispatcher, handle, platform) = setup(5);
        platform.take_handle("Carol");

        handle.submit(connect(2, "unnamed")).await.unwrap();
        handle
            .submit(Event::Rename {
                client_id: 2,
                old_name: "unnamed".to_string(),
                new_name: "Carol".to_string(),
            })
            .await
            .unwrap();
        handle.submit(chat(2, "Carol", "hello")).await.unwrap();
        drain(&mut dispatcher).await;

        assert_eq!(
            platform.calls(),
            vec![
                Call::Open("unnamed".to_string()),
                Call::Send("unnamed".to_string(), "joined".to_string()),
                Call::Send("unnamed".to_string(), "is now known as Carol".to_string()),
                Call::Send("unnamed".to_string(), "hello".to_string()),
                Call::Rename("unnamed".to_string(), "Carol_".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_rename_while_retry_pending_is_announced() {
        let (mut dispatcher, handle, platform) = setup(5);
        platform.take_handle("Carol");
        platform.take_handle("Alice");

        // open session, rename retry pending
        handle.submit(connect(2, "unnamed")).await.unwrap();
        handle
            .submit(Event::Rename {
                client_id: 2,
                old_name: "unnamed".to_string(),
                new_name: "Carol".to_string(),
            })
            .await
            .unwrap();
        handle
            .submit(Event::Rename {
                client_id: 2,
                old_name: "Carol".to_string(),
                new_name: "Dan".to_string(),
            })
            .await
            .unwrap();
        // no session yet, connect retry pending
        handle.submit(connect(4, "Alice")).await.unwrap();
        handle
            .submit(Event::Rename {
                client_id: 4,
                old_name: "Alice".to_string(),
                new_name: "Erin".to_string(),
            })
            .await
            .unwrap();
        drain(&mut dispatcher).await;

        let sends = platform.sends();
        assert!(sends.contains(&("unnamed".to_string(), "is now known as Dan".to_string())));
        assert!(sends.contains(&("~Alice".to_string(), "is now known as Erin".to_string())));
        assert_eq!(dispatcher.registry.get(2).unwrap().handle, "Dan");
        assert_eq!(dispatcher.registry.get(4).unwrap().handle, "Erin");
        assert!(sends.contains(&("Erin".to_string(), "joined".to_string())));
    }

    #[tokio::test]
    async fn test_display_name_reaches_platform_unescaped() {
        let (mut dispatcher, _handle, platform) = setup(5);
        dispatcher
            .handle_event(Event::Kick {
                actor: "Mr.X".to_string(),
                target: "y".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(platform.sends()[0].0, "~Mr.X");
    }

    #[tokio::test]
    async fn test_rename_for_unknown_client() {
        let (mut dispatcher, _handle, _platform) = setup(5);
        let result = dispatcher
            .handle_event(Event::Rename {
                client_id: 8,
                old_name: "a".to_string(),
                new_name: "b".to_string(),
            })
            .await;
        assert!(matches!(result, Err(BridgeError::IdentityNotFound { client_id: 8 })));
    }

    #[tokio::test]
    async fn test_master_and_kick_attribution() {
        let (mut dispatcher, _handle, platform) = setup(5);
        dispatcher.handle_event(connect(1, "admin")).await.unwrap();

        dispatcher
            .handle_event(Event::MasterChange {
                name: "admin".to_string(),
                op: MasterOp::Claimed,
                privilege: "admin".to_string(),
            })
            .await
            .unwrap();
        dispatcher
            .handle_event(Event::Kick {
                actor: "someone else".to_string(),
                target: "spammer".to_string(),
            })
            .await
            .unwrap();

        let sends = platform.sends();
        assert_eq!(sends[1], ("admin".to_string(), "has claimed admin".to_string()));
        assert_eq!(
            sends[2],
            ("~someone else".to_string(), "has kicked **spammer**!".to_string())
        );
    }

    #[tokio::test]
    async fn test_submit_rejects_unrecognized() {
        let (_dispatcher, handle, _platform) = setup(5);
        let result = handle
            .submit(Event::Unrecognized {
                raw: "noise".to_string(),
            })
            .await;
        assert!(matches!(result, Err(BridgeError::MalformedInput { .. })));
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_queue() {
        let (dispatcher, handle, platform) = setup(5);
        handle.submit(connect(1, "A")).await.unwrap();
        handle.submit(connect(1, "A")).await.unwrap(); // AlreadyLive
        handle.submit(chat(1, "A", "still here")).await.unwrap();
        drop(handle);

        dispatcher.run().await;

        let sends = platform.sends();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[1], ("A".to_string(), "still here".to_string()));
        // run() closes every live session on exit
        assert_eq!(platform.calls().last(), Some(&Call::Close("A".to_string())));
    }

    #[tokio::test]
    async fn test_platform_failure_is_isolated() {
        let (dispatcher, handle, platform) = setup(5);
        handle.submit(connect(1, "A")).await.unwrap();
        drop(handle);

        platform.fail_sends(true);
        dispatcher.run().await;

        // session opened, greeting failed, shutdown still closed it
        assert!(platform.open_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_side_effects_follow_submission_order() {
        let (dispatcher, handle, platform) = setup(5);
        handle.submit(connect(1, "A")).await.unwrap();
        handle.submit(connect(2, "B")).await.unwrap();
        platform.delay_send("first", Duration::from_millis(50));
        handle.submit(chat(1, "A", "first")).await.unwrap();
        handle.submit(chat(2, "B", "second")).await.unwrap();
        platform.delay_send("third", Duration::from_millis(20));
        handle.submit(chat(1, "A", "third")).await.unwrap();
        handle.submit(chat(2, "B", "fourth")).await.unwrap();
        drop(handle);

        dispatcher.run().await;

        let texts: Vec<String> = platform
            .sends()
            .into_iter()
            .map(|(_, text)| text)
            .filter(|t| t != "joined")
            .collect();
        assert_eq!(texts, vec!["first", "second", "third", "fourth"]);
    }

    #[tokio::test]
    async fn test_job_timeout_fails_job_only() {
        let platform = Arc::new(MockPlatform::new());
        let options = DispatcherOptions {
            job_timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        let (dispatcher, handle) = Dispatcher::new(platform.clone(), options);

        handle.submit(connect(1, "A")).await.unwrap();
        platform.delay_send("slow", Duration::from_millis(200));
        handle.submit(chat(1, "A", "slow")).await.unwrap();
        handle.submit(chat(1, "A", "fast")).await.unwrap();
        drop(handle);

        dispatcher.run().await;

        let texts: Vec<String> = platform.sends().into_iter().map(|(_, t)| t).collect();
        assert_eq!(texts, vec!["joined", "fast"]);
    }
}
