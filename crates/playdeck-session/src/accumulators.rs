//! Append-only text buffers fed by streaming deltas

use serde::{Deserialize, Serialize};

/// Which buffer a delta belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaChannel {
    Assistant,
    Reasoning,
    Thinking,
}

impl DeltaChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaChannel::Assistant => "assistant",
            DeltaChannel::Reasoning => "reasoning",
            DeltaChannel::Thinking => "thinking",
        }
    }
}

/// The three per-step delta buffers. Reset at the start of every step.
#[derive(Debug, Clone, Default)]
pub struct DeltaBuffers {
    assistant: String,
    reasoning: String,
    thinking: String,
}

impl DeltaBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, channel: DeltaChannel, delta: &str) {
        self.buffer_mut(channel).push_str(delta);
    }

    pub fn read(&self, channel: DeltaChannel) -> &str {
        match channel {
            DeltaChannel::Assistant => &self.assistant,
            DeltaChannel::Reasoning => &self.reasoning,
            DeltaChannel::Thinking => &self.thinking,
        }
    }

    pub fn reset(&mut self) {
        self.assistant.clear();
        self.reasoning.clear();
        self.thinking.clear();
    }

    fn buffer_mut(&mut self, channel: DeltaChannel) -> &mut String {
        match channel {
            DeltaChannel::Assistant => &mut self.assistant,
            DeltaChannel::Reasoning => &mut self.reasoning,
            DeltaChannel::Thinking => &mut self.thinking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_is_concatenation_of_deltas() {
        let deltas = ["Hel", "lo", " ", "w\u{f6}rld", ""];
        let mut buffers = DeltaBuffers::new();
        for d in deltas {
            buffers.append(DeltaChannel::Assistant, d);
        }
        assert_eq!(buffers.read(DeltaChannel::Assistant), deltas.concat());
    }

    #[test]
    fn test_channels_are_independent() {
        let mut buffers = DeltaBuffers::new();
        buffers.append(DeltaChannel::Reasoning, "why");
        buffers.append(DeltaChannel::Thinking, "hmm");
        assert_eq!(buffers.read(DeltaChannel::Assistant), "");
        assert_eq!(buffers.read(DeltaChannel::Reasoning), "why");
        assert_eq!(buffers.read(DeltaChannel::Thinking), "hmm");

        buffers.reset();
        assert_eq!(buffers.read(DeltaChannel::Reasoning), "");
    }
}
