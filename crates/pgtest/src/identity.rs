//! Resolves the account the PostgreSQL children run as.
//!
//! PostgreSQL refuses to run as root, so a superuser invocation must drop to
//! the conventional `postgres` service account. The identity is resolved once
//! per start and handed to every component that touches the filesystem or
//! spawns a process.

use std::ffi::OsStr;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use nix::errno::Errno;
use nix::unistd::{Gid, Uid, User, geteuid};
use thiserror::Error;
use tracing::{debug, info};

use crate::IDENTITY_TARGET;

/// Account used for the server when the caller runs as root.
pub const SERVICE_ACCOUNT: &str = "postgres";

/// Errors raised while resolving the execution identity.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// Running as root without a service account to drop to.
    #[error("could not find the '{account}' user, which is required when running as root")]
    MissingAccount {
        /// Account name that was looked up.
        account: String,
    },
    /// The account database could not be queried.
    #[error("failed to look up user '{account}': {source}")]
    Lookup {
        /// Account name that was looked up.
        account: String,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// The invoking user has no account entry.
    #[error("failed to resolve the name of uid {uid}")]
    UnknownInvoker {
        /// Effective uid of the current process.
        uid: u32,
    },
}

/// The account PostgreSQL processes are executed as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionIdentity {
    /// Children inherit the invoking account unchanged.
    Inherited {
        /// Name of the invoking account; also the cluster superuser role.
        user: String,
    },
    /// Children switch to an unprivileged account before exec.
    Dropped {
        /// Name of the target account; also the cluster superuser role.
        user: String,
        /// Target user id.
        uid: Uid,
        /// Target group id.
        gid: Gid,
    },
}

impl ExecutionIdentity {
    /// Inspects the effective user and resolves the identity for children.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError::MissingAccount`] when running as root and the
    /// `postgres` account does not exist.
    pub fn resolve() -> Result<Self, PrivilegeError> {
        let euid = geteuid();
        if euid.is_root() {
            let identity = Self::service_account(SERVICE_ACCOUNT)?;
            info!(
                target: IDENTITY_TARGET,
                account = identity.user(),
                "running as root; children will drop privileges"
            );
            return Ok(identity);
        }
        let user = User::from_uid(euid)
            .map_err(|_| PrivilegeError::UnknownInvoker { uid: euid.as_raw() })?
            .ok_or(PrivilegeError::UnknownInvoker { uid: euid.as_raw() })?;
        debug!(
            target: IDENTITY_TARGET,
            account = %user.name,
            "running unprivileged; children inherit the invoking account"
        );
        Ok(Self::Inherited { user: user.name })
    }

    /// Resolves the drop target for the named account.
    ///
    /// # Errors
    ///
    /// Fails when the account is unknown or the lookup itself fails.
    pub fn service_account(account: &str) -> Result<Self, PrivilegeError> {
        let user = User::from_name(account)
            .map_err(|source| PrivilegeError::Lookup {
                account: account.to_owned(),
                source,
            })?
            .ok_or_else(|| PrivilegeError::MissingAccount {
                account: account.to_owned(),
            })?;
        Ok(Self::Dropped {
            user: user.name,
            uid: user.uid,
            gid: user.gid,
        })
    }

    /// Name of the account, which is also the superuser role `initdb` creates.
    #[must_use]
    pub fn user(&self) -> &str {
        match self {
            Self::Inherited { user } | Self::Dropped { user, .. } => user,
        }
    }

    /// Whether children switch accounts before exec.
    #[must_use]
    pub const fn is_elevated(&self) -> bool {
        matches!(self, Self::Dropped { .. })
    }

    /// Owner to apply to directories the children write into.
    #[must_use]
    pub const fn ownership(&self) -> Option<(Uid, Gid)> {
        match self {
            Self::Inherited { .. } => None,
            Self::Dropped { uid, gid, .. } => Some((*uid, *gid)),
        }
    }

    /// Builds a command that runs `program` with `args` as this identity.
    ///
    /// Arguments are passed to the child verbatim, so an empty string stays an
    /// empty argument. When privileges are dropped the child also starts in
    /// `workdir`, because the invoker's working directory is usually not
    /// readable by the service account.
    pub fn command<I, S>(&self, program: &Path, args: I, workdir: &Path) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        command.args(args);
        if let Self::Dropped { uid, gid, .. } = self {
            command
                .uid(uid.as_raw())
                .gid(gid.as_raw())
                .current_dir(workdir);
        }
        command
    }
}
