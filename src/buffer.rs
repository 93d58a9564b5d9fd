use crate::event::{AppEvent, BufferOp, GenerationId, GenerationStatus};
use eframe::egui;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use tracing::debug;

/// Text shown in the plan area.
///
/// Only events from the active generation are applied, so a task that was
/// superseded by a newer submit cannot write into the display.
#[derive(Debug)]
pub struct PlanBuffer {
    text: String,
    active: Option<GenerationId>,
    status: GenerationStatus,
}

impl Default for PlanBuffer {
    fn default() -> Self {
        Self {
            text: String::new(),
            active: None,
            status: GenerationStatus::Idle,
        }
    }
}

impl PlanBuffer {
    pub fn read(&self) -> &str {
        &self.text
    }

    pub fn append(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Empties the display and detaches it from any generation, so writes
    /// still in flight from that generation are dropped.
    pub fn reset(&mut self) {
        self.text.clear();
        self.active = None;
        self.status = GenerationStatus::Idle;
    }

    pub fn status(&self) -> GenerationStatus {
        self.status
    }

    pub fn active_generation(&self) -> Option<GenerationId> {
        self.active
    }

    /// Applies an event; returns whether the display changed.
    pub fn apply(&mut self, event: AppEvent) -> bool {
        match event {
            AppEvent::Started(generation) => {
                self.active = Some(generation);
                self.status = GenerationStatus::Running;
                self.text.clear();
                true
            }
            AppEvent::Buffer { generation, op } => {
                if self.active != Some(generation) {
                    debug!(%generation, "dropping write from stale generation");
                    return false;
                }
                match op {
                    BufferOp::Clear => self.text.clear(),
                    BufferOp::Append(text) => self.text.push_str(&text),
                }
                true
            }
            AppEvent::Finished { generation, status } => {
                if self.active != Some(generation) {
                    return false;
                }
                self.status = status;
                true
            }
        }
    }
}

/// Write handle for one generation's background task.
#[derive(Clone)]
pub struct BufferWriter {
    generation: GenerationId,
    tx: mpsc::Sender<AppEvent>,
    live: Arc<AtomicBool>,
    repaint: Option<egui::Context>,
}

impl BufferWriter {
    pub fn new(
        generation: GenerationId,
        tx: mpsc::Sender<AppEvent>,
        live: Arc<AtomicBool>,
        repaint: Option<egui::Context>,
    ) -> Self {
        Self {
            generation,
            tx,
            live,
            repaint,
        }
    }

    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    /// False once the app is shutting down or the display is gone.
    fn send(&self, event: AppEvent) -> bool {
        if !self.live.load(Ordering::SeqCst) {
            return false;
        }
        if self.tx.send(event).is_err() {
            return false;
        }
        if let Some(ctx) = &self.repaint {
            ctx.request_repaint();
        }
        true
    }

    pub fn start(&self) -> bool {
        self.send(AppEvent::Started(self.generation))
    }

    pub fn clear(&self) -> bool {
        self.send(AppEvent::Buffer {
            generation: self.generation,
            op: BufferOp::Clear,
        })
    }

    pub fn append(&self, text: impl Into<String>) -> bool {
        self.send(AppEvent::Buffer {
            generation: self.generation,
            op: BufferOp::Append(text.into()),
        })
    }

    pub fn finish(&self, status: GenerationStatus) -> bool {
        self.send(AppEvent::Finished {
            generation: self.generation,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(id: u64, tx: &mpsc::Sender<AppEvent>, live: &Arc<AtomicBool>) -> BufferWriter {
        BufferWriter::new(GenerationId(id), tx.clone(), Arc::clone(live), None)
    }

    #[test]
    fn stale_generation_writes_are_ignored() {
        let (tx, rx) = mpsc::channel();
        let live = Arc::new(AtomicBool::new(true));
        let old = writer(1, &tx, &live);
        let new = writer(2, &tx, &live);

        old.start();
        old.append("old plan");
        new.start();
        old.append(" late write");
        new.append("new plan");
        old.finish(GenerationStatus::Failed);

        let mut buffer = PlanBuffer::default();
        for event in rx.try_iter() {
            buffer.apply(event);
        }

        assert_eq!(buffer.read(), "new plan");
        assert_eq!(buffer.active_generation(), Some(GenerationId(2)));
        assert_eq!(buffer.status(), GenerationStatus::Running);
    }

    #[test]
    fn writes_are_suppressed_after_shutdown() {
        let (tx, rx) = mpsc::channel();
        let live = Arc::new(AtomicBool::new(true));
        let handle = writer(7, &tx, &live);

        assert!(handle.start());
        live.store(false, Ordering::SeqCst);
        assert!(!handle.append("after teardown"));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events, vec![AppEvent::Started(GenerationId(7))]);
    }

    #[test]
    fn writes_fail_when_display_is_gone() {
        let (tx, rx) = mpsc::channel();
        let live = Arc::new(AtomicBool::new(true));
        let handle = writer(3, &tx, &live);
        drop(rx);

        assert!(!handle.append("nobody listening"));
    }

    #[test]
    fn reset_detaches_the_running_generation() {
        let mut buffer = PlanBuffer::default();
        buffer.apply(AppEvent::Started(GenerationId(5)));
        buffer.apply(AppEvent::Buffer {
            generation: GenerationId(5),
            op: BufferOp::Append("f1 ".to_string()),
        });

        buffer.reset();
        buffer.append("warning\n");
        let changed = buffer.apply(AppEvent::Buffer {
            generation: GenerationId(5),
            op: BufferOp::Append("f2 ".to_string()),
        });

        assert!(!changed);
        assert_eq!(buffer.read(), "warning\n");
        assert_eq!(buffer.active_generation(), None);
        assert_eq!(buffer.status(), GenerationStatus::Idle);
    }

    #[test]
    fn finish_sets_status_for_active_generation() {
        let mut buffer = PlanBuffer::default();
        buffer.apply(AppEvent::Started(GenerationId(4)));
        buffer.apply(AppEvent::Finished {
            generation: GenerationId(4),
            status: GenerationStatus::Done,
        });
        assert_eq!(buffer.status(), GenerationStatus::Done);
    }
}
