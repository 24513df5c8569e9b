use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CollabError;

/// Which editor a channel belongs to
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Idea,
    BlockNote,
}

impl ChannelKind {
    fn prefix(self) -> &'static str {
        match self {
            ChannelKind::Idea => "idea",
            ChannelKind::BlockNote => "blocknote",
        }
    }
}

/// Name of the pub/sub topic scoping one document: `idea-<id>` or `blocknote-<id>`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelName {
    kind: ChannelKind,
    doc_id: String,
}

impl ChannelName {
    pub fn new(kind: ChannelKind, doc_id: &str) -> Result<Self, CollabError> {
        if doc_id.is_empty()
            || !doc_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CollabError::InvalidChannel(format!("{}-{}", kind.prefix(), doc_id)));
        }
        Ok(Self {
            kind,
            doc_id: doc_id.to_string(),
        })
    }

    pub fn idea(doc_id: &str) -> Result<Self, CollabError> {
        Self::new(ChannelKind::Idea, doc_id)
    }

    pub fn blocknote(doc_id: &str) -> Result<Self, CollabError> {
        Self::new(ChannelKind::BlockNote, doc_id)
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.prefix(), self.doc_id)
    }
}

impl FromStr for ChannelName {
    type Err = CollabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, doc_id) = s
            .split_once('-')
            .ok_or_else(|| CollabError::InvalidChannel(s.to_string()))?;
        let kind = match prefix {
            "idea" => ChannelKind::Idea,
            "blocknote" => ChannelKind::BlockNote,
            _ => return Err(CollabError::InvalidChannel(s.to_string())),
        };
        Self::new(kind, doc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_channel_kinds() {
        let idea: ChannelName = "idea-42".parse().unwrap();
        assert_eq!(idea.kind(), ChannelKind::Idea);
        assert_eq!(idea.doc_id(), "42");

        // Ids may contain dashes themselves, e.g. uuids
        let note: ChannelName = "blocknote-6f1c-aa_9".parse().unwrap();
        assert_eq!(note.kind(), ChannelKind::BlockNote);
        assert_eq!(note.doc_id(), "6f1c-aa_9");
        assert_eq!(note.to_string(), "blocknote-6f1c-aa_9");
    }

    #[test]
    fn rejects_unknown_prefix_and_bad_ids() {
        assert!("doc-1".parse::<ChannelName>().is_err());
        assert!("idea-".parse::<ChannelName>().is_err());
        assert!("idea".parse::<ChannelName>().is_err());
        assert!("idea-a/b".parse::<ChannelName>().is_err());
    }
}
