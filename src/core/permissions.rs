// FILE: src/core/permissions.rs
//! Process identity and mount options.
//!
//! Every inode is reported as owned by the invoking user. Under sudo that is
//! the original user, not root.

use fuser::MountOption;
use crate::config::MountSettings;

#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    pub is_root: bool,
}

impl Identity {
    /// Capture current or sudo identity
    pub fn capture() -> Self {
        let current_uid = Self::get_current_uid();
        let is_root = current_uid == 0;

        let sudo = std::env::var("SUDO_UID").ok()
            .zip(std::env::var("SUDO_GID").ok())
            .and_then(|(uid, gid)| Some((uid.parse::<u32>().ok()?, gid.parse::<u32>().ok()?)));

        let (uid, gid) = match sudo {
            Some((uid, gid)) if is_root => {
                tracing::info!("[Identity] Running under sudo, serving as UID:{} GID:{}", uid, gid);
                (uid, gid)
            }
            _ => {
                if is_root {
                    tracing::warn!("[Identity] Running as root without sudo environment variables");
                } else {
                    tracing::info!("[Identity] Running as UID:{} GID:{}", current_uid, Self::get_current_gid());
                }
                (current_uid, Self::get_current_gid())
            }
        };

        Self { uid, gid, is_root }
    }

    fn get_current_uid() -> u32 { unsafe { libc::getuid() } }
    fn get_current_gid() -> u32 { unsafe { libc::getgid() } }

    /// Mount options from settings. `allow_other` needs root (or
    /// `user_allow_other` in fuse.conf), so it is only requested when asked for.
    pub fn mount_options(&self, settings: &MountSettings) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(settings.fsname.clone()),
            MountOption::DefaultPermissions,
            MountOption::NoDev,
            MountOption::NoSuid,
        ];
        if settings.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        if settings.allow_other {
            if !self.is_root {
                tracing::warn!("[Identity] allow_other requested without root; fuse.conf must permit it");
            }
            options.push(MountOption::AllowOther);
        }
        options
    }
}
