//! Wire enums of the hard synchronization protocol.

use serde::{Deserialize, Serialize};

/// Two-valued round tag carried in the upper bits of every RPC tag, so that
/// messages from a previous synchronization round cannot be confused with a
/// later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum Epoch {
    Even = 0x00,
    Odd = 0x10,
}

impl Epoch {
    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn toggle(self) -> Epoch {
        match self {
            Epoch::Even => Epoch::Odd,
            Epoch::Odd => Epoch::Even,
        }
    }
}

/// Request kinds of the hard-sync servers.
///
/// `Token` and `End` belong to the termination algorithm and are not epoch
/// tagged: the epoch toggles at different instants on different ranks while
/// they circulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Tag {
    Read = 0x00,
    ReadResponse = 0x01,
    Acquire = 0x02,
    AcquireResponse = 0x03,
    ReleaseAcquire = 0x04,
    Lock = 0x05,
    LockResponse = 0x06,
    Unlock = 0x07,
    LockShared = 0x08,
    LockSharedResponse = 0x09,
    UnlockShared = 0x0A,
    Link = 0x0B,
    Unlink = 0x0C,
    Token = 0x0D,
    End = 0x0E,
    RemoveNode = 0x0F,
}

impl Tag {
    pub fn bits(self) -> u32 {
        self as u32
    }
}

/// Epoch-qualified wire tag.
pub fn tagged(epoch: Epoch, tag: Tag) -> u32 {
    epoch.bits() | tag.bits()
}

/// Process/token color of the termination algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    White,
    Black,
}

/// Kinds of requests a node's mutex can queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexRequestKind {
    Read,
    Lock,
    Acquire,
    LockShared,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_toggle() {
        assert_eq!(Epoch::Even.toggle(), Epoch::Odd);
        assert_eq!(Epoch::Odd.toggle(), Epoch::Even);
    }

    #[test]
    fn test_tagged_keeps_rounds_apart() {
        let even = tagged(Epoch::Even, Tag::Read);
        let odd = tagged(Epoch::Odd, Tag::Read);
        assert_ne!(even, odd);
        assert_eq!(odd & 0x10, 0x10);
        // No protocol tag collides with an epoch-qualified one.
        assert_ne!(tagged(Epoch::Odd, Tag::Read), Tag::Unlink.bits());
    }
}
