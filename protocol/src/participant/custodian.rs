//! Custodians and the custodian roster.

use std::collections::HashSet;
use std::sync::Arc;

use rand::{CryptoRng, RngCore};

use super::agent::Agent;
use super::error::ParticipantError;
use crate::sharing::Share;
use crate::transport::{AgentIdentity, SealedShare};

/// A named, addressable agent that holds at most one share per secret.
///
/// Cloning is cheap; clones share the same agent.
#[derive(Debug, Clone)]
pub struct Custodian {
    name: String,
    agent: Arc<Agent>,
}

impl Custodian {
    pub fn new(name: impl Into<String>, agent: Arc<Agent>) -> Self {
        Self {
            name: name.into(),
            agent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The agent id, which is also the custodian's key in a roster.
    pub fn id(&self) -> &str {
        self.agent.id()
    }

    pub fn address(&self) -> &str {
        self.agent.address()
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Hand this custodian its share; `y` is sealed to the custodian's key
    /// before it is stored.
    pub fn assign_share<R: RngCore + CryptoRng>(
        &self,
        share: &Share,
        rng: &mut R,
    ) -> Result<(), ParticipantError> {
        self.agent.add_share(share, rng)
    }

    pub fn share(&self, secret_id: &str) -> Option<SealedShare> {
        self.agent.sealed_share(secret_id)
    }

    pub fn has_share(&self, secret_id: &str) -> bool {
        self.agent.has_share(secret_id)
    }
}

/// The custodian roster of a vault. At least two members, unique ids, fixed
/// for the roster's lifetime.
#[derive(Debug, Clone)]
pub struct Custodians {
    members: Vec<Custodian>,
}

impl Custodians {
    pub fn new(members: Vec<Custodian>) -> Result<Self, ParticipantError> {
        if members.len() < 2 {
            return Err(ParticipantError::RosterTooSmall(members.len()));
        }
        let mut seen = HashSet::new();
        for custodian in &members {
            if !seen.insert(custodian.id()) {
                return Err(ParticipantError::DuplicateCustodian(custodian.id().to_owned()));
            }
        }
        Ok(Self { members })
    }

    /// Build a roster of public-only agents from exported identities. Each
    /// custodian is named after its agent id.
    pub fn from_identities(
        identities: impl IntoIterator<Item = AgentIdentity>,
    ) -> Result<Self, ParticipantError> {
        let members = identities
            .into_iter()
            .map(|identity| {
                let name = identity.id.clone();
                Custodian::new(name, Arc::new(Agent::from_identity(identity)))
            })
            .collect();
        Self::new(members)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false for a validated roster.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Custodian> {
        self.members.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Custodian> {
        self.members.iter().find(|c| c.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn as_slice(&self) -> &[Custodian] {
        &self.members
    }
}

impl<'a> IntoIterator for &'a Custodians {
    type Item = &'a Custodian;
    type IntoIter = std::slice::Iter<'a, Custodian>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::tests::test_keypair;
    use crate::sharing::split;
    use rand::rngs::OsRng;

    fn custodian(id: &str) -> Custodian {
        let agent = Agent::public_only(id, format!("inbox/{id}"), test_keypair().public_key().clone());
        Custodian::new(format!("{id} (name)"), Arc::new(agent))
    }

    #[test]
    fn roster_needs_two_members() {
        assert!(matches!(
            Custodians::new(vec![custodian("a")]),
            Err(ParticipantError::RosterTooSmall(1))
        ));
        assert!(matches!(
            Custodians::new(vec![]),
            Err(ParticipantError::RosterTooSmall(0))
        ));
        assert_eq!(Custodians::new(vec![custodian("a"), custodian("b")]).unwrap().len(), 2);
    }

    #[test]
    fn roster_rejects_duplicate_ids() {
        assert!(matches!(
            Custodians::new(vec![custodian("a"), custodian("b"), custodian("a")]),
            Err(ParticipantError::DuplicateCustodian(ref id)) if id == "a"
        ));
    }

    #[test]
    fn lookup_by_id() {
        let roster = Custodians::new(vec![custodian("a"), custodian("b")]).unwrap();
        assert_eq!(roster.get("b").unwrap().name(), "b (name)");
        assert_eq!(roster.get("b").unwrap().address(), "inbox/b");
        assert!(roster.contains("a"));
        assert!(!roster.contains("c"));
        assert_eq!(roster.iter().map(|c| c.id()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn roster_from_identities() {
        let identities: Vec<AgentIdentity> = ["x", "y", "z"]
            .iter()
            .map(|id| AgentIdentity {
                id: id.to_string(),
                address: format!("inbox/{id}"),
                public_key: test_keypair().public_key().clone(),
            })
            .collect();
        let roster = Custodians::from_identities(identities).unwrap();
        assert_eq!(roster.len(), 3);
        assert!(roster.iter().all(|c| !c.agent().can_decrypt()));
        assert_eq!(roster.get("y").unwrap().name(), "y");
    }

    #[test]
    fn assign_share_fills_the_slot() {
        let c = custodian("a");
        let share = split("disk", "secret", 2, 3, &mut OsRng).unwrap().into_vec().remove(0);
        assert!(!c.has_share("disk"));
        c.assign_share(&share, &mut OsRng).unwrap();
        assert!(c.has_share("disk"));
        assert_eq!(c.share("disk").unwrap().x, share.x);
    }
}
