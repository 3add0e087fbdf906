//! Message handlers and queue/worker supervision.
//!
//! Everything here runs synchronously inside one event-loop iteration;
//! handlers update item state, free pipeline capacity and notify the
//! progress collaborator, and never block except to write small replies.

use crate::item::ItemState;
use crate::protocol::{self, Message};
use crate::verify::{self, Verdict};
use crate::worker::{Worker, WorkerEvent};

use super::Acquire;

impl Acquire {
    /// Fill every queue's pipeline: start missing workers and push backlog
    /// items until each worker reaches its negotiated depth.
    pub(super) async fn cycle(&mut self) {
        let keys: Vec<String> = self.queues.keys().cloned().collect();
        for key in keys {
            self.cycle_queue(&key).await;
        }
    }

    async fn cycle_queue(&mut self, key: &str) {
        // Items routed to a queue whose method already proved unusable can
        // never be sent; fail them instead of letting the run hang.
        if self.queues[key].broken {
            if self.queues[key].backlog_len() > 0 {
                self.fail_queue(key, "method unavailable");
            }
            return;
        }

        // Lazily spawn the worker when there is work. The spawn itself never
        // waits on the child: the Capabilities handshake arrives through the
        // event loop like any other message, so pulses keep firing while a
        // slow method starts up.
        let needs_worker = {
            let q = &self.queues[key];
            q.backlog_len() > 0 && q.worker.is_none()
        };
        if needs_worker {
            let access = self.queues[key].access.clone();
            match Worker::spawn(&access, &self.cfg.methods_dir) {
                Ok(worker) => {
                    self.queues.get_mut(key).unwrap().worker = Some(worker);
                }
                Err(e) => {
                    let reason = e.to_string();
                    tracing::warn!(queue = key, "worker spawn failed: {reason}");
                    self.fail_queue(key, &reason);
                    return;
                }
            }
        }

        loop {
            let q = self.queues.get_mut(key).unwrap();
            let Some(worker) = q.worker.as_mut() else {
                break;
            };
            if !worker.is_ready() {
                // still handshaking; requests wait in the backlog
                break;
            }
            let depth = worker.config.pipeline_depth(self.cfg.max_pipeline_depth);
            let Some(id) = q.next_to_send(depth) else {
                break;
            };
            if self.items[id.0].state != ItemState::Queued {
                // cancelled (or otherwise retired) while waiting in the backlog
                continue;
            }
            let worker = q.worker.as_mut().unwrap();
            if let Err(e) = worker.send(id, &self.items[id.0]).await {
                tracing::warn!(queue = key, "request write failed: {e}");
                q.requeue_front(id);
                self.worker_failed(key, "method terminated unexpectedly");
                break;
            }
        }

        // Tear down a worker whose queue drained, unless the method asked to
        // stay for cleanup.
        let q = self.queues.get_mut(key).unwrap();
        if q.is_idle() {
            let needs_cleanup = q
                .worker
                .as_ref()
                .map_or(false, |w| w.config.needs_cleanup);
            if !needs_cleanup {
                if let Some(mut worker) = q.worker.take() {
                    tracing::debug!(queue = key, "queue drained, shutting down worker");
                    worker.kill();
                }
            }
        }
    }

    pub(super) async fn handle_event(&mut self, key: &str, event: WorkerEvent) {
        match event {
            WorkerEvent::Closed => self.worker_failed(key, "method terminated unexpectedly"),
            WorkerEvent::Messages(msgs) => {
                // a Capabilities message may collapse/rename the queue;
                // later messages from the same batch follow it to the new key
                let mut key = key.to_string();
                for msg in msgs {
                    if let Some(renamed) = self.dispatch(&key, msg).await {
                        key = renamed;
                    }
                }
            }
        }
    }

    /// Dispatch one decoded message from the worker on `key`. Returns the
    /// queue's new key when handling renamed it (Single-Instance collapse).
    async fn dispatch(&mut self, key: &str, msg: Message) -> Option<String> {
        match msg.code {
            protocol::CAPABILITIES => return self.capabilities(key, &msg).await,
            protocol::LOG => {
                tracing::info!(queue = key, "method: {}", msg.header("Message").unwrap_or(""));
            }
            protocol::STATUS => {
                tracing::debug!(queue = key, "status: {}", msg.header("Message").unwrap_or(""));
            }
            protocol::URI_START => self.uri_start(key, &msg),
            protocol::URI_DONE => self.uri_done(key, &msg),
            protocol::URI_FAILURE => self.uri_failure(key, &msg),
            protocol::GENERAL_FAILURE => {
                let reason = msg.header("Message").unwrap_or(&msg.reason).to_string();
                tracing::warn!(queue = key, "general failure: {reason}");
                self.worker_failed(key, &format!("general failure: {reason}"));
            }
            protocol::AUTH_REQUIRED => self.auth_required(key, &msg).await,
            protocol::MEDIA_CHANGE => self.media_change(key, &msg).await,
            code => {
                tracing::warn!(queue = key, "unhandled status code {code}");
            }
        }
        None
    }

    /// Complete a worker's handshake: record its capability set, push the
    /// configuration tree if requested, and enforce Single-Instance by
    /// collapsing every queue of the access method into one.
    async fn capabilities(&mut self, key: &str, msg: &Message) -> Option<String> {
        let Some(worker) = self.queues.get_mut(key).and_then(|q| q.worker.as_mut()) else {
            return None;
        };
        if worker.is_ready() {
            // only expected during the handshake; harmless afterwards
            tracing::debug!(queue = key, "late Capabilities message ignored");
            return None;
        }
        worker.apply_capabilities(msg);
        let mcfg = worker.config.clone();
        tracing::debug!(
            queue = key,
            version = %mcfg.version,
            pipeline = mcfg.pipeline,
            "method ready"
        );

        if mcfg.send_config {
            if let Err(e) = worker.send_configuration(&self.cfg.options).await {
                tracing::warn!(queue = key, "config push failed: {e}");
                self.worker_failed(key, "method terminated unexpectedly");
                return None;
            }
        }
        self.configs.insert(mcfg.access.clone(), mcfg.clone());

        if mcfg.single_instance {
            return self.collapse_to_single_instance(key, &mcfg.access);
        }
        None
    }

    /// Single-Instance: exactly one queue (and worker) per access method.
    /// Sibling queues created before the handshake revealed the flag are
    /// drained into this one and removed; the surviving queue is re-keyed to
    /// the bare access name so later enqueues land on it too.
    fn collapse_to_single_instance(&mut self, key: &str, access: &str) -> Option<String> {
        let siblings: Vec<String> = self
            .queues
            .iter()
            .filter(|(name, q)| name.as_str() != key && q.access == access)
            .map(|(name, _)| name.clone())
            .collect();

        let mut adopted = Vec::new();
        for name in siblings {
            tracing::debug!(from = %name, to = key, "collapsing single-instance queue");
            if let Some(mut q) = self.queues.remove(&name) {
                if let Some(mut w) = q.worker.take() {
                    adopted.extend(w.take_in_flight());
                    w.kill();
                }
                adopted.extend(q.drain_backlog());
            }
        }
        for &id in &adopted {
            let item = &mut self.items[id.0];
            if item.state == ItemState::Fetching {
                item.mark_failed("method restarted", false);
                item.transition(ItemState::Queued);
            }
        }

        if key == access {
            let q = self.queues.get_mut(key)?;
            for id in adopted {
                q.push(id);
            }
            return None;
        }
        let mut q = self.queues.remove(key)?;
        q.name = access.to_string();
        for id in adopted {
            q.push(id);
        }
        self.queues.insert(access.to_string(), q);
        Some(access.to_string())
    }

    fn uri_start(&mut self, key: &str, msg: &Message) {
        let Some(id) = self.in_flight_item(key, msg) else {
            return;
        };
        let item = &mut self.items[id.0];
        item.transition(ItemState::Fetching);
        if let Some(size) = msg.header_u64("Size") {
            item.total_size = size;
        }
        self.progress.fetch(&self.items[id.0]);
    }

    fn uri_done(&mut self, key: &str, msg: &Message) {
        let Some(id) = self.retire_in_flight(key, msg) else {
            return;
        };
        let ims_hit = msg.header_bool("IMS-Hit", false);
        let item = &mut self.items[id.0];
        if ims_hit {
            // destination untouched, nothing transferred
            item.bytes_fetched = 0;
            item.transition(ItemState::Done { ims_hit: true });
            self.progress.ims_hit(&self.items[id.0]);
            return;
        }

        item.bytes_fetched = msg.header_u64("Size").unwrap_or(0);
        item.transition(ItemState::Done { ims_hit: false });

        // Verification collaborator: a mismatch demotes Done to terminal
        // failure and is never retried.
        if !item.expected_hashes.is_empty() {
            let reason = match verify::verify_file(&item.dest, &item.expected_hashes) {
                Ok(Verdict::Ok) => None,
                Ok(Verdict::Mismatch { kind, expected, actual }) => Some(format!(
                    "{kind} hash mismatch: expected {expected}, got {actual}"
                )),
                Err(e) => Some(format!("verification failed: {e:#}")),
            };
            if let Some(reason) = reason {
                let item = &mut self.items[id.0];
                item.mark_failed(reason.clone(), true);
                self.progress.fail(&self.items[id.0], &reason);
                return;
            }
        }
        self.progress.done(&self.items[id.0]);
    }

    fn uri_failure(&mut self, key: &str, msg: &Message) {
        let Some(id) = self.retire_in_flight(key, msg) else {
            return;
        };
        let reason = msg
            .header("Message")
            .unwrap_or("failed without explanation")
            .to_string();
        let transient = msg.header_bool("Transient", false);
        let retries = self.items[id.0].retries;

        match self.retry.decide(transient, retries) {
            crate::retry::RetryDecision::Requeue => {
                let item = &mut self.items[id.0];
                item.retries += 1;
                item.mark_failed(reason.clone(), false);
                item.transition(ItemState::Queued);
                tracing::info!(
                    uri = %self.items[id.0].uri,
                    retry = self.items[id.0].retries,
                    "transient failure, requeued: {reason}"
                );
                self.queues.get_mut(key).unwrap().push(id);
            }
            crate::retry::RetryDecision::Fail => {
                self.items[id.0].mark_failed(reason.clone(), true);
                self.progress.fail(&self.items[id.0], &reason);
            }
        }
    }

    async fn auth_required(&mut self, key: &str, msg: &Message) {
        let site = msg.header("Site").unwrap_or("").to_string();
        let (user, password) = {
            let (u, p) = self.cfg.credentials_for(&site);
            (u.map(str::to_string), p.map(str::to_string))
        };
        if user.is_none() {
            tracing::warn!(queue = key, site, "no credentials configured");
        }
        let Some(worker) = self.queues.get_mut(key).and_then(|q| q.worker.as_mut()) else {
            return;
        };
        if let Err(e) = worker
            .send_auth_credentials(&site, user.as_deref(), password.as_deref())
            .await
        {
            tracing::warn!(queue = key, "auth reply failed: {e}");
            self.worker_failed(key, "method terminated unexpectedly");
        }
    }

    /// 403: synchronous caller prompt. A negative (or absent) answer makes
    /// the method fail the affected requests.
    async fn media_change(&mut self, key: &str, msg: &Message) {
        let media = msg.header("Media").unwrap_or("").to_string();
        let drive = msg.header("Drive").unwrap_or("").to_string();
        let ok = self.progress.media_change(&media, &drive);
        let Some(worker) = self.queues.get_mut(key).and_then(|q| q.worker.as_mut()) else {
            return;
        };
        if let Err(e) = worker.send_media_changed(&media, !ok).await {
            tracing::warn!(queue = key, "media reply failed: {e}");
            self.worker_failed(key, "method terminated unexpectedly");
        }
    }

    /// The subprocess is unusable: fail or migrate everything it owed us and
    /// never reuse it.
    pub(super) fn worker_failed(&mut self, key: &str, reason: &str) {
        let Some(q) = self.queues.get_mut(key) else {
            return;
        };
        q.broken = true;
        let access = q.access.clone();
        let mut stranded = Vec::new();
        if let Some(mut worker) = q.worker.take() {
            stranded.extend(worker.take_in_flight());
            worker.kill();
        }
        stranded.extend(q.drain_backlog());
        if stranded.is_empty() {
            return;
        }

        // Prefer migrating to an equivalent queue for the same access method
        // (alternate mirror host); fewest-outstanding-first, then name order.
        if let Some(alt) = self.pick_alternate_queue(&access, key) {
            tracing::info!(from = key, to = %alt, "migrating {} items off dead worker", stranded.len());
            for id in stranded {
                let item = &mut self.items[id.0];
                if item.state.is_terminal() {
                    continue;
                }
                if item.state == ItemState::Fetching {
                    item.mark_failed(reason.to_string(), false);
                }
                if item.state != ItemState::Queued {
                    item.transition(ItemState::Queued);
                }
                self.queues.get_mut(&alt).unwrap().push(id);
            }
            return;
        }

        for id in stranded {
            if self.items[id.0].state.is_terminal() {
                continue;
            }
            self.items[id.0].mark_failed(reason.to_string(), true);
            self.progress.fail(&self.items[id.0], reason);
        }
    }

    /// Fail a queue whose worker never became usable (startup error).
    fn fail_queue(&mut self, key: &str, reason: &str) {
        let q = self.queues.get_mut(key).unwrap();
        q.broken = true;
        let stranded = q.drain_backlog();
        for id in stranded {
            if self.items[id.0].state.is_terminal() {
                continue;
            }
            self.items[id.0].mark_failed(reason.to_string(), true);
            self.progress.fail(&self.items[id.0], reason);
        }
    }

    fn pick_alternate_queue(&self, access: &str, exclude: &str) -> Option<String> {
        self.queues
            .iter()
            .filter(|(name, q)| {
                name.as_str() != exclude && q.access == access && !q.broken
            })
            .min_by_key(|(name, q)| (q.outstanding(), name.as_str()))
            .map(|(name, _)| name.clone())
    }

    fn in_flight_item(&self, key: &str, msg: &Message) -> Option<crate::item::ItemId> {
        let uri = msg.header("URI")?;
        let found = self
            .queues
            .get(key)
            .and_then(|q| q.worker.as_ref())
            .and_then(|w| w.find_in_flight(uri));
        if found.is_none() {
            tracing::warn!(queue = key, uri, "message for unknown request");
        }
        found
    }

    fn retire_in_flight(&mut self, key: &str, msg: &Message) -> Option<crate::item::ItemId> {
        let uri = msg.header("URI")?;
        let found = self
            .queues
            .get_mut(key)
            .and_then(|q| q.worker.as_mut())
            .and_then(|w| w.retire(uri));
        if found.is_none() {
            tracing::warn!(queue = key, uri, "completion for unknown request");
        }
        found
    }
}
