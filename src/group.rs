//! Group membership bookkeeping for a single DKG run.
//!
//! A group is formed once, with a dense 1-based index space, and only ever
//! shrinks: members proven to have cheated are disqualified, members that
//! failed to participate in a phase are marked inactive. Both classifications
//! are terminal for the run and a member holds at most one of them.

use parity_scale_codec::{Decode, Encode};

/// Identifier of a group member, unique within a single run.
///
/// Indices are 1-based and dense at group formation time. They double as
/// evaluation points of the secret sharing polynomials, so index `0` is never
/// used.
pub type MemberIndex = u32;

/// All members selected for a DKG run, together with the run's threshold and
/// the mutable disqualified/inactive subsets.
///
/// The disqualified and inactive lists preserve the order in which membership
/// was decided; downstream equality checks are order-sensitive.
#[derive(Clone, Debug, Encode, Decode)]
pub struct Group {
    threshold: u32,
    members: Vec<MemberIndex>,
    disqualified: Vec<MemberIndex>,
    inactive: Vec<MemberIndex>,
}

impl Group {
    /// Create a group of `size` members indexed `1..=size`.
    pub fn new(threshold: u32, size: u32) -> Self {
        Self {
            threshold,
            members: (1..=size).collect(),
            disqualified: Vec::new(),
            inactive: Vec::new(),
        }
    }

    /// Minimum number of honest contributors required to reconstruct secrets.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Number of members the group was formed with.
    pub fn size(&self) -> u32 {
        self.members.len() as u32
    }

    /// All member indices, in formation order.
    pub fn members(&self) -> &[MemberIndex] {
        &self.members
    }

    /// Whether `member` was part of the group at formation time.
    pub fn is_member(&self, member: MemberIndex) -> bool {
        self.members.contains(&member)
    }

    /// Whether `member` is still operating: in the group and neither
    /// disqualified nor inactive.
    pub fn is_operating(&self, member: MemberIndex) -> bool {
        self.is_member(member)
            && !self.disqualified.contains(&member)
            && !self.inactive.contains(&member)
    }

    /// Mark `member` as proven to have cheated.
    ///
    /// Idempotent, and a no-op for members that are not part of the group or
    /// already carry a classification. The first classification a member
    /// receives is terminal for the run.
    pub fn mark_disqualified(&mut self, member: MemberIndex) {
        if self.is_operating(member) {
            self.disqualified.push(member);
        }
    }

    /// Mark `member` as having failed to participate, without proof of
    /// cheating. Same idempotence rules as [`Group::mark_disqualified`].
    pub fn mark_inactive(&mut self, member: MemberIndex) {
        if self.is_operating(member) {
            self.inactive.push(member);
        }
    }

    /// Members proven to have cheated, in the order the verdicts were reached.
    pub fn disqualified(&self) -> &[MemberIndex] {
        &self.disqualified
    }

    /// Members that failed to participate, in the order they were classified.
    pub fn inactive(&self) -> &[MemberIndex] {
        &self.inactive
    }

    /// Members still operating, in formation order.
    pub fn operating_members(&self) -> Vec<MemberIndex> {
        self.members
            .iter()
            .copied()
            .filter(|member| self.is_operating(*member))
            .collect()
    }
}
