use crate::domains::checkpoint::Checkpoint;

/// UI-side sink for patrol updates. Calls must return quickly.
pub trait PatrolPresenter: Send + Sync {
    fn show_checkpoints(&self, checkpoints: &[Checkpoint]);

    fn clear_checkpoints(&self);

    fn checkpoint_verified(&self, checkpoint_id: &str, verified: u32, total: u32);

    /// The officer moved into or out of range of a checkpoint.
    fn proximity_changed(&self, checkpoint_id: &str, is_in_range: bool);
}

/// Presenter for headless use
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPresenter;

impl PatrolPresenter for NoopPresenter {
    fn show_checkpoints(&self, _checkpoints: &[Checkpoint]) {}

    fn clear_checkpoints(&self) {}

    fn checkpoint_verified(&self, _checkpoint_id: &str, _verified: u32, _total: u32) {}

    fn proximity_changed(&self, _checkpoint_id: &str, _is_in_range: bool) {}
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum PresenterCall {
        Show(Vec<String>),
        Clear,
        Verified(String, u32, u32),
        Proximity(String, bool),
    }

    /// Records every call in order
    #[derive(Default)]
    pub struct RecordingPresenter {
        pub calls: Mutex<Vec<PresenterCall>>,
    }

    impl RecordingPresenter {
        pub fn calls(&self) -> Vec<PresenterCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PatrolPresenter for RecordingPresenter {
        fn show_checkpoints(&self, checkpoints: &[Checkpoint]) {
            let ids = checkpoints.iter().map(|c| c.id.clone()).collect();
            self.calls.lock().unwrap().push(PresenterCall::Show(ids));
        }

        fn clear_checkpoints(&self) {
            self.calls.lock().unwrap().push(PresenterCall::Clear);
        }

        fn checkpoint_verified(&self, checkpoint_id: &str, verified: u32, total: u32) {
            self.calls
                .lock()
                .unwrap()
                .push(PresenterCall::Verified(checkpoint_id.to_string(), verified, total));
        }

        fn proximity_changed(&self, checkpoint_id: &str, is_in_range: bool) {
            self.calls
                .lock()
                .unwrap()
                .push(PresenterCall::Proximity(checkpoint_id.to_string(), is_in_range));
        }
    }
}
