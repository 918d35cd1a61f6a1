use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// At-most-one-frame-in-flight gate.
///
/// The device callback asks for a permit before handing a frame to the pipeline
/// context. While a permit is alive every other frame is refused and should be
/// discarded by the caller. Dropping the permit reopens the gate.
#[derive(Debug, Clone, Default)]
pub struct AdmissionGate {
    busy: Arc<AtomicBool>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_admit(&self) -> Option<AdmissionPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| AdmissionPermit {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof that a frame was admitted. Held until the frame is fully sent or dropped.
#[derive(Debug)]
pub struct AdmissionPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
