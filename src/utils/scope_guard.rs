/// Teardown actions collected while a session is being set up and run
/// exactly once, most recent first, on `dispose()` or drop.
#[derive(Default)]
pub struct Disposers(Vec<(&'static str, Box<dyn FnOnce() + Send>)>);

impl Disposers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, label: &'static str, f: impl FnOnce() + Send + 'static) {
        self.0.push((label, Box::new(f)));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn dispose(&mut self) {
        while let Some((label, f)) = self.0.pop() {
            tracing::debug!("Disposing {}", label);
            f();
        }
    }
}

impl Drop for Disposers {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn runs_in_reverse_order_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut disposers = Disposers::new();
        for name in ["timers", "channel"] {
            let log = log.clone();
            disposers.push(name, move || log.lock().unwrap().push(name));
        }

        disposers.dispose();
        disposers.dispose();
        drop(disposers);
        assert_eq!(*log.lock().unwrap(), vec!["channel", "timers"]);
    }

    #[test]
    fn drop_runs_pending_disposers() {
        let hit = Arc::new(Mutex::new(false));
        {
            let mut disposers = Disposers::new();
            let hit = hit.clone();
            disposers.push("flag", move || *hit.lock().unwrap() = true);
        }
        assert!(*hit.lock().unwrap());
    }
}
