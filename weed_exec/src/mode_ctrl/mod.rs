//! # Mode State Machine
//!
//! Holds the single authoritative operating mode. Every transition updates the mode, sends
//! `MODE:<name>` to the microcontroller, persists the mode and runs the caller's transition
//! action, all while the mode lock is held, so no other thread can observe a new mode before
//! its side effects are complete. Setting the current mode again is a no-op.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod controller;
pub mod store;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::{mcu::McuCmd, Mode};
use log::{info, warn};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::serial_link::McuLink;
use store::ModeStore;

pub use controller::{ControlEvent, Controller};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Called with the new mode after every transition.
pub type ModeObserver = Box<dyn Fn(Mode) + Send + Sync>;

/// Owner of the operating mode.
pub struct ModeCtrl {
    mode: Mutex<Mode>,
    link: Arc<dyn McuLink>,
    store: Box<dyn ModeStore>,
    observers: Mutex<Vec<ModeObserver>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ModeCtrl {
    /// Create the state machine in `AUTO`. Nothing is sent or persisted.
    pub fn new(link: Arc<dyn McuLink>, store: Box<dyn ModeStore>) -> Self {
        Self {
            mode: Mutex::new(Mode::default()),
            link,
            store,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer, called after every transition.
    pub fn add_observer(&self, observer: ModeObserver) {
        lock(&self.observers).push(observer);
    }

    pub fn mode(&self) -> Mode {
        *lock(&self.mode)
    }

    /// The mode persisted by a previous run, if any and valid.
    pub fn persisted(&self) -> Option<Mode> {
        match self.store.load() {
            Ok(m) => m,
            Err(e) => {
                warn!("Ignoring the persisted mode: {}", e);
                None
            }
        }
    }

    /// Transition to `new` with no transition action. Returns false if already in `new`.
    pub fn set_mode(&self, new: Mode) -> bool {
        self.set_mode_with(new, |_, _| ())
    }

    /// Transition to `new`, running `on_transition(old, new)` under the mode lock once the
    /// mode has been sent and persisted.
    ///
    /// Returns false, without any side effect, if already in `new`.
    pub fn set_mode_with<F>(&self, new: Mode, on_transition: F) -> bool
    where
        F: FnOnce(Mode, Mode),
    {
        {
            let mut mode = lock(&self.mode);
            if *mode == new {
                return false;
            }

            let old = *mode;
            *mode = new;
            info!("Mode changed {} -> {}", old, new);

            if let Err(e) = self.link.send(&McuCmd::Mode(new).to_string()) {
                warn!("Could not send the mode to the microcontroller: {}", e);
            }

            if let Err(e) = self.store.save(new) {
                warn!("Could not persist the mode: {}", e);
            }

            on_transition(old, new);
        }

        for observer in lock(&self.observers).iter() {
            observer(new);
        }

        true
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::serial_link::fakes::RecordingLink;
    use store::{ModeStoreError, RecoveryFile};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store counting writes
    #[derive(Default)]
    struct CountingStore {
        saved: Arc<Mutex<Vec<Mode>>>,
    }

    impl ModeStore for CountingStore {
        fn load(&self) -> Result<Option<Mode>, ModeStoreError> {
            Ok(self.saved.lock().unwrap().last().copied())
        }

        fn save(&self, mode: Mode) -> Result<(), ModeStoreError> {
            self.saved.lock().unwrap().push(mode);
            Ok(())
        }
    }

    #[test]
    fn test_transition_idempotent() {
        let link = Arc::new(RecordingLink::default());
        let store = CountingStore::default();
        let saved = store.saved.clone();
        let ctrl = ModeCtrl::new(link.clone(), Box::new(store));

        let actions = AtomicUsize::new(0);

        assert!(ctrl.set_mode_with(Mode::Manual, |old, new| {
            assert_eq!((old, new), (Mode::Auto, Mode::Manual));
            actions.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!ctrl.set_mode_with(Mode::Manual, |_, _| {
            actions.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(ctrl.mode(), Mode::Manual);
        assert_eq!(link.sent(), vec!["MODE:MANUAL"]);
        assert_eq!(*saved.lock().unwrap(), vec![Mode::Manual]);
        assert_eq!(actions.load(Ordering::SeqCst), 1);

        // Setting the initial mode is also a no-op
        let ctrl = ModeCtrl::new(link.clone(), Box::new(CountingStore::default()));
        assert!(!ctrl.set_mode(Mode::Auto));
        assert_eq!(link.sent().len(), 1);
    }

    #[test]
    fn test_observers() {
        let ctrl = ModeCtrl::new(
            Arc::new(RecordingLink::default()), Box::new(CountingStore::default())
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        ctrl.add_observer(Box::new(move |m| s.lock().unwrap().push(m)));

        ctrl.set_mode(Mode::Distortion);
        ctrl.set_mode(Mode::Distortion);
        ctrl.set_mode(Mode::Auto);

        assert_eq!(*seen.lock().unwrap(), vec![Mode::Distortion, Mode::Auto]);
    }

    #[test]
    fn test_persisted_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mode.txt");

        let ctrl = ModeCtrl::new(
            Arc::new(RecordingLink::default()), Box::new(RecoveryFile::new(&path))
        );
        assert_eq!(ctrl.persisted(), None);
        ctrl.set_mode(Mode::Extrinsik);

        // Restart
        let ctrl = ModeCtrl::new(
            Arc::new(RecordingLink::default()), Box::new(RecoveryFile::new(&path))
        );
        assert_eq!(ctrl.mode(), Mode::Auto);
        assert_eq!(ctrl.persisted(), Some(Mode::Extrinsik));

        // Corrupt file is ignored
        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(ctrl.persisted(), None);
    }
}
