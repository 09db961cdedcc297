use crate::target::RemoteTarget;
use crate::types::{MountConfig, DEFAULT_SUBTYPE};

impl MountConfig {
    /// Apply default inference rules to the configuration.
    /// This mutates the config in place.
    pub fn apply_defaults(&mut self) {
        // 1. Ids embedded in the target URL win over configured ones
        if let Some(target) = self.target.as_deref().and_then(|t| RemoteTarget::parse(t).ok()) {
            if target.uid.is_some() {
                self.identity.uid = target.uid;
            }
            if target.gid.is_some() {
                self.identity.gid = target.gid;
            }
        }

        // 2. Serving other users under their own ids needs allow_other
        if self.identity.allow_other_own_ids {
            self.fuse.allow_other = true;
        }

        // 3. fsname defaults to the target, subtype to fuse-nfs
        if self.fuse.fsname.is_none() {
            self.fuse.fsname = self.target.clone();
        }
        if self.fuse.subtype.is_none() {
            self.fuse.subtype = Some(DEFAULT_SUBTYPE.to_string());
        }
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> MountConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }
}
