use std::time::Duration;
use tokio::time::Instant;

/// Something the broadcaster wants put on the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Content {
        content: String,
        cursor_position: Option<usize>,
    },
    Typing(bool),
}

#[derive(Debug)]
struct Pending {
    content: String,
    cursor_position: Option<usize>,
    deadline: Instant,
}

/// Coalesces keystrokes into one snapshot send per quiet window and
/// drives the typing indicator on its own, longer timer.
#[derive(Debug)]
pub struct DebouncedBroadcaster {
    content_delay: Duration,
    typing_timeout: Duration,
    pending: Option<Pending>,
    typing_deadline: Option<Instant>,
    last_sent: Option<String>,
}

impl DebouncedBroadcaster {
    pub fn new(content_delay: Duration, typing_timeout: Duration) -> Self {
        Self {
            content_delay,
            typing_timeout,
            pending: None,
            typing_deadline: None,
            last_sent: None,
        }
    }

    /// Record a local edit. Returns `Some(Outgoing::Typing(true))` when this
    /// edit starts a typing burst and should be announced immediately.
    pub fn on_local_edit(
        &mut self,
        content: &str,
        cursor_position: Option<usize>,
        now: Instant,
    ) -> Option<Outgoing> {
        self.pending = Some(Pending {
            content: content.to_string(),
            cursor_position,
            deadline: now + self.content_delay,
        });

        let started = self.typing_deadline.is_none();
        self.typing_deadline = Some(now + self.typing_timeout);
        started.then_some(Outgoing::Typing(true))
    }

    /// Fire every timer that is due at `now`
    pub fn poll(&mut self, now: Instant) -> Vec<Outgoing> {
        let mut out = Vec::new();

        if self.pending.as_ref().is_some_and(|p| p.deadline <= now) {
            if let Some(pending) = self.pending.take() {
                if self.last_sent.as_deref() != Some(pending.content.as_str()) {
                    out.push(Outgoing::Content {
                        content: pending.content,
                        cursor_position: pending.cursor_position,
                    });
                }
            }
        }

        if self.typing_deadline.is_some_and(|deadline| deadline <= now) {
            self.typing_deadline = None;
            out.push(Outgoing::Typing(false));
        }

        out
    }

    /// Remember what actually went out so an identical snapshot is not re-sent
    pub fn mark_sent(&mut self, content: &str) {
        self.last_sent = Some(content.to_string());
    }

    /// A remote snapshot replaced the document; the pending local one is stale
    pub fn discard_pending_content(&mut self) {
        self.pending = None;
    }

    pub fn is_typing(&self) -> bool {
        self.typing_deadline.is_some()
    }

    pub fn has_pending_content(&self) -> bool {
        self.pending.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let content = self.pending.as_ref().map(|p| p.deadline);
        match (content, self.typing_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drop both timers without sending anything
    pub fn cancel(&mut self) {
        self.pending = None;
        self.typing_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcaster() -> DebouncedBroadcaster {
        DebouncedBroadcaster::new(Duration::from_millis(300), Duration::from_millis(1000))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn burst_of_edits_sends_only_the_last_snapshot() {
        let mut b = broadcaster();
        let t0 = Instant::now();
        let mut sent = Vec::new();

        for (i, text) in ["H", "He", "Hel", "Hell", "Hello"].iter().enumerate() {
            let at = t0 + ms(50 * i as u64);
            b.on_local_edit(text, Some(text.len()), at);
            sent.extend(b.poll(at));
        }
        sent.extend(b.poll(t0 + ms(200 + 299)));
        assert!(sent.iter().all(|o| !matches!(o, Outgoing::Content { .. })));

        let flushed = b.poll(t0 + ms(200 + 300));
        assert_eq!(
            flushed,
            vec![Outgoing::Content {
                content: "Hello".to_string(),
                cursor_position: Some(5)
            }]
        );
        assert!(b.poll(t0 + ms(900)).is_empty());
    }

    #[test]
    fn typing_starts_once_and_stops_once() {
        let mut b = broadcaster();
        let t0 = Instant::now();

        assert_eq!(b.on_local_edit("a", None, t0), Some(Outgoing::Typing(true)));
        assert_eq!(b.on_local_edit("ab", None, t0 + ms(400)), None);
        assert!(b.is_typing());

        let mut stops = 0;
        for step in 0..40 {
            stops += b
                .poll(t0 + ms(100 * step))
                .iter()
                .filter(|o| **o == Outgoing::Typing(false))
                .count();
        }
        assert_eq!(stops, 1);
        assert!(!b.is_typing());

        // A new burst announces typing again
        assert_eq!(b.on_local_edit("abc", None, t0 + ms(5000)), Some(Outgoing::Typing(true)));
    }

    #[test]
    fn identical_content_is_not_resent() {
        let mut b = broadcaster();
        let t0 = Instant::now();
        b.on_local_edit("same", None, t0);
        let out = b.poll(t0 + ms(300));
        assert_eq!(out.len(), 1);
        b.mark_sent("same");

        b.on_local_edit("same", None, t0 + ms(400));
        let out = b.poll(t0 + ms(700));
        assert!(out.iter().all(|o| !matches!(o, Outgoing::Content { .. })));
    }

    #[test]
    fn next_deadline_is_the_earliest_timer() {
        let mut b = broadcaster();
        assert_eq!(b.next_deadline(), None);
        let t0 = Instant::now();
        b.on_local_edit("x", None, t0);
        assert_eq!(b.next_deadline(), Some(t0 + ms(300)));
        b.poll(t0 + ms(300));
        assert_eq!(b.next_deadline(), Some(t0 + ms(1000)));
    }

    #[test]
    fn cancel_clears_both_timers() {
        let mut b = broadcaster();
        let t0 = Instant::now();
        b.on_local_edit("x", None, t0);
        b.cancel();
        assert_eq!(b.next_deadline(), None);
        assert!(b.poll(t0 + ms(5000)).is_empty());
    }

    #[test]
    fn discarding_pending_content_keeps_typing_timer() {
        let mut b = broadcaster();
        let t0 = Instant::now();
        b.on_local_edit("x", None, t0);
        b.discard_pending_content();
        assert!(!b.has_pending_content());
        assert_eq!(b.poll(t0 + ms(1000)), vec![Outgoing::Typing(false)]);
    }
}
