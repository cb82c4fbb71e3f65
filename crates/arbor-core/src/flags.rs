#![forbid(unsafe_code)]

//! Side-effect flags carried by fibers.
//!
//! `flags` describes work for the fiber itself; `subtree_flags` is the union
//! of `flags | subtree_flags` over all descendants and lets each commit phase
//! skip entire subtrees whose mask bits are clear.

bitflags::bitflags! {
    /// Pending side effects on a fiber.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u32 {
        /// Insert or move this fiber's host nodes.
        const PLACEMENT      = 1 << 0;
        /// Host props or text changed.
        const UPDATE         = 1 << 1;
        /// `deletions` holds children to remove.
        const CHILD_DELETION = 1 << 2;
        /// Layout effects registered during render.
        const CALLBACK       = 1 << 3;
        /// Snapshot effects to run before mutation.
        const SNAPSHOT       = 1 << 4;
        /// Passive effects to run after commit.
        const PASSIVE        = 1 << 5;
        /// Suspense boundary toggled between content and fallback.
        const VISIBILITY     = 1 << 6;
        /// Suspense boundary has wakeables to attach retries to.
        const RETRY          = 1 << 7;
        /// Boundary must re-render to capture a thrown value.
        const SHOULD_CAPTURE = 1 << 8;
        /// Boundary is re-rendering after a capture.
        const DID_CAPTURE    = 1 << 9;
        /// Fiber did not complete; its subtree is being unwound.
        const INCOMPLETE     = 1 << 10;
        /// Fiber owns unmount callbacks. Survives cloning.
        const UNMOUNT_STATIC = 1 << 11;
    }
}

impl Flags {
    /// Flags that survive `clone_for_work`.
    pub const STATIC_MASK: Self = Self::UNMOUNT_STATIC;
    pub const BEFORE_MUTATION_MASK: Self = Self::SNAPSHOT;
    pub const MUTATION_MASK: Self = Self::PLACEMENT
        .union(Self::UPDATE)
        .union(Self::CHILD_DELETION)
        .union(Self::VISIBILITY)
        .union(Self::RETRY);
    pub const LAYOUT_MASK: Self = Self::CALLBACK;
    pub const PASSIVE_MASK: Self = Self::PASSIVE;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_masks_do_not_overlap() {
        let masks = [
            Flags::BEFORE_MUTATION_MASK,
            Flags::MUTATION_MASK,
            Flags::LAYOUT_MASK,
            Flags::PASSIVE_MASK,
            Flags::STATIC_MASK,
        ];
        for (i, a) in masks.iter().enumerate() {
            for b in &masks[i + 1..] {
                assert!(!a.intersects(*b));
            }
        }
    }

    #[test]
    fn capture_flags_are_outside_commit_masks() {
        let commit = Flags::BEFORE_MUTATION_MASK
            | Flags::MUTATION_MASK
            | Flags::LAYOUT_MASK
            | Flags::PASSIVE_MASK;
        assert!(!commit.intersects(Flags::SHOULD_CAPTURE | Flags::DID_CAPTURE | Flags::INCOMPLETE));
    }
}
