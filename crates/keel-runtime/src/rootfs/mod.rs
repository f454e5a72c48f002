use std::{
    io,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::client::User;

#[derive(Error, Debug)]
pub enum RootfsError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Operations performed directly on a container's root filesystem.
#[async_trait]
pub trait RootfsManager: Send + Sync {
    /// Resolve `username` against `<rootfs>/etc/passwd`. `Ok(None)` when no entry matches.
    async fn lookup_user(&self, rootfs: &Path, username: &str)
    -> Result<Option<User>, RootfsError>;

    /// Make sure `cwd` exists inside the root filesystem.
    async fn setup_cwd(&self, rootfs: &Path, cwd: &Path) -> Result<(), RootfsError>;
}

/// [`RootfsManager`] operating on a root filesystem mounted on the host.
#[derive(Debug, Clone)]
pub struct HostRootfs {
    /// Permissions applied to a newly created working directory.
    pub cwd_mode: u32,
}

impl Default for HostRootfs {
    fn default() -> Self {
        Self { cwd_mode: 0o777 }
    }
}

#[async_trait]
impl RootfsManager for HostRootfs {
    async fn lookup_user(
        &self,
        rootfs: &Path,
        username: &str,
    ) -> Result<Option<User>, RootfsError> {
        let passwd = rootfs.join("etc/passwd");
        let content = match tokio::fs::read_to_string(&passwd).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(RootfsError::Io { path: passwd, source }),
        };

        Ok(find_user(&content, username))
    }

    async fn setup_cwd(&self, rootfs: &Path, cwd: &Path) -> Result<(), RootfsError> {
        let abs = confine(rootfs, cwd);
        if tokio::fs::metadata(&abs).await.is_ok() {
            return Ok(());
        }

        debug!(path = %abs.display(), "creating working directory");
        tokio::fs::create_dir_all(&abs)
            .await
            .map_err(|source| RootfsError::Io {
                path: abs.clone(),
                source,
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(self.cwd_mode);
            tokio::fs::set_permissions(&abs, perms)
                .await
                .map_err(|source| RootfsError::Io {
                    path: abs.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Find `username` in passwd-formatted `content` (`name:password:uid:gid:gecos:home:shell`).
/// Malformed lines are skipped.
fn find_user(content: &str, username: &str) -> Option<User> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .find_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            if name != username {
                return None;
            }
            let _password = fields.next()?;
            let uid = fields.next()?.parse().ok()?;
            let gid = fields.next()?.parse().ok()?;
            Some(User {
                uid,
                gid,
                additional_gids: Vec::new(),
            })
        })
}

/// Join `path` onto `root` without letting `..` climb above `root`.
fn confine(root: &Path, path: &Path) -> PathBuf {
    let mut inner = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => inner.push(part),
            Component::ParentDir => {
                inner.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    root.join(inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/sh
# service accounts
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
broken-line
concourse:x:1000:1001::/home/concourse:/bin/bash
";

    #[test]
    fn find_user_reads_uid_and_gid() {
        assert_eq!(
            find_user(PASSWD, "concourse"),
            Some(User {
                uid: 1000,
                gid: 1001,
                additional_gids: Vec::new()
            })
        );
        assert_eq!(find_user(PASSWD, "root").map(|u| u.uid), Some(0));
    }

    #[test]
    fn find_user_skips_comments_and_malformed_lines() {
        assert_eq!(find_user(PASSWD, "broken-line"), None);
        assert_eq!(find_user(PASSWD, "# service accounts"), None);
        assert_eq!(find_user("bad:x:notanumber:0::/:/bin/sh", "bad"), None);
    }

    #[test]
    fn confine_stays_inside_root() {
        let root = Path::new("/rootfs");
        assert_eq!(confine(root, Path::new("/tmp/build")), root.join("tmp/build"));
        assert_eq!(confine(root, Path::new("/../../etc")), root.join("etc"));
        assert_eq!(confine(root, Path::new("/a/./b/../c")), root.join("a/c"));
        assert_eq!(confine(root, Path::new("/")), root.to_path_buf());
    }

    #[tokio::test]
    async fn lookup_user_in_rootfs() {
        let rootfs = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(rootfs.path().join("etc")).unwrap();
        std::fs::write(rootfs.path().join("etc/passwd"), PASSWD).unwrap();

        let manager = HostRootfs::default();
        let user = manager
            .lookup_user(rootfs.path(), "concourse")
            .await
            .unwrap();
        assert_eq!(user.map(|u| (u.uid, u.gid)), Some((1000, 1001)));

        let missing = manager.lookup_user(rootfs.path(), "nobody").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn lookup_user_without_passwd_file_is_not_found() {
        let rootfs = tempfile::tempdir().unwrap();
        let user = HostRootfs::default()
            .lookup_user(rootfs.path(), "root")
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn setup_cwd_creates_missing_directory() {
        let rootfs = tempfile::tempdir().unwrap();
        HostRootfs::default()
            .setup_cwd(rootfs.path(), Path::new("/tmp/build/work"))
            .await
            .unwrap();

        let created = rootfs.path().join("tmp/build/work");
        assert!(created.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&created).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o777);
        }
    }

    #[tokio::test]
    async fn setup_cwd_leaves_existing_directory_alone() {
        let rootfs = tempfile::tempdir().unwrap();
        let existing = rootfs.path().join("work");
        std::fs::create_dir(&existing).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&existing, std::fs::Permissions::from_mode(0o700)).unwrap();
        }

        HostRootfs::default()
            .setup_cwd(rootfs.path(), Path::new("/work"))
            .await
            .unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&existing).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
