use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenerationId(pub u64);

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Idle,
    Running,
    Done,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferOp {
    Clear,
    Append(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Started(GenerationId),
    Buffer {
        generation: GenerationId,
        op: BufferOp,
    },
    Finished {
        generation: GenerationId,
        status: GenerationStatus,
    },
}
