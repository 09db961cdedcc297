//! Translation between local caller identities and remote RPC credentials.

use fusenfs_config::IdentityConfig;

use crate::types::Identity;

/// Configured override ids. Each half is independent; an unset half is
/// neither sent nor mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverrideIds {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl OverrideIds {
    pub const fn new(uid: Option<u32>, gid: Option<u32>) -> Self {
        OverrideIds { uid, gid }
    }
}

impl From<Identity> for OverrideIds {
    fn from(id: Identity) -> Self {
        OverrideIds::new(Some(id.uid), Some(id.gid))
    }
}

/// What identity is attached to outgoing remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialOverride {
    /// Forward the caller's own identity.
    #[default]
    None,
    /// Always send the configured ids.
    Fixed(OverrideIds),
    /// Send the configured ids for the mounting user; other callers keep their own.
    FixedWithPassthroughForOthers(OverrideIds),
}

impl CredentialOverride {
    /// The override ids, if any.
    pub fn ids(&self) -> OverrideIds {
        match self {
            CredentialOverride::None => OverrideIds::default(),
            CredentialOverride::Fixed(ids)
            | CredentialOverride::FixedWithPassthroughForOthers(ids) => *ids,
        }
    }
}

/// Stateless mapper between local and remote identities.
///
/// Reads only the configured override and the mount-time identity; every
/// method is a pure function of its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityMapper {
    credentials: CredentialOverride,
    mount: Identity,
}

impl IdentityMapper {
    pub fn new(credentials: CredentialOverride, mount: Identity) -> Self {
        IdentityMapper { credentials, mount }
    }

    /// Build a mapper from configuration.
    pub fn from_config(config: &IdentityConfig, mount: Identity) -> Self {
        let ids = OverrideIds::new(config.uid, config.gid);
        let credentials = if !config.has_override() {
            CredentialOverride::None
        } else if config.allow_other_own_ids {
            CredentialOverride::FixedWithPassthroughForOthers(ids)
        } else {
            CredentialOverride::Fixed(ids)
        };
        IdentityMapper::new(credentials, mount)
    }

    pub fn credentials(&self) -> CredentialOverride {
        self.credentials
    }

    /// Identity of the process that performed the mount.
    pub fn mount_identity(&self) -> Identity {
        self.mount
    }

    /// Credentials to put on a call made by `caller`.
    ///
    /// uid and gid are decided independently. With passthrough enabled, a
    /// field that differs from the mount identity is forwarded as-is.
    pub fn outgoing(&self, caller: Identity) -> Identity {
        let (ids, passthrough) = match self.credentials {
            CredentialOverride::None => return caller,
            CredentialOverride::Fixed(ids) => (ids, false),
            CredentialOverride::FixedWithPassthroughForOthers(ids) => (ids, true),
        };
        let pick = |configured: Option<u32>, own: u32, mount: u32| match configured {
            Some(id) if !passthrough || own == mount => id,
            _ => own,
        };
        Identity {
            uid: pick(ids.uid, caller.uid, self.mount.uid),
            gid: pick(ids.gid, caller.gid, self.mount.gid),
        }
    }

    /// Remote owner uid as it should appear to `caller`.
    pub fn to_local_uid(&self, remote: u32, caller: Identity) -> u32 {
        match self.credentials.ids().uid {
            Some(uid) if remote == uid => caller.uid,
            _ => remote,
        }
    }

    /// Remote owner gid as it should appear to `caller`.
    pub fn to_local_gid(&self, remote: u32, caller: Identity) -> u32 {
        match self.credentials.ids().gid {
            Some(gid) if remote == gid => caller.gid,
            _ => remote,
        }
    }

    /// Uid to send when setting ownership to local `uid`.
    pub fn to_remote_uid(&self, local: u32) -> u32 {
        match self.credentials.ids().uid {
            Some(uid) if local == self.mount.uid => uid,
            _ => local,
        }
    }

    /// Gid to send when setting ownership to local `gid`.
    pub fn to_remote_gid(&self, local: u32) -> u32 {
        match self.credentials.ids().gid {
            Some(gid) if local == self.mount.gid => gid,
            _ => local,
        }
    }
}
