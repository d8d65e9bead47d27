use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::exec::{self, CommandError, Transport};
use super::note::{Note, NoteStore};
use crate::error::{Error, Result};

/// A remote git repo holding the config files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repo {
    /// e.g. `https://github.com/myorg/conf.git` or `git@example.com:myorg/conf`.
    pub url: String,
    pub branch: String,
    /// Private key allowed to clone from and push to `url`.
    pub key: Option<PathBuf>,
    /// Directory within the repo holding the manifests.
    pub path: String,
    pub verify_host_keys: bool,
}

impl Repo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn verifying_host_keys(mut self) -> Self {
        self.verify_host_keys = true;
        self
    }

    fn transport(&self) -> Transport<'_> {
        Transport {
            key: self.key.as_deref(),
            verify_host_keys: self.verify_host_keys,
        }
    }

    /// Clone the repo into a fresh temporary directory.
    pub fn clone_checkout(&self, config: Config) -> Result<Checkout> {
        if self.url.is_empty() {
            return Err(Error::NoRepo);
        }

        // ssh refuses keys readable by others. Keys mounted from secrets often
        // come with a looser mode, so narrow it rather than fail.
        if let Some(key) = &self.key {
            narrow_key_permissions(key)?;
        }

        let dir = tempfile::Builder::new().prefix("tideway-clone").tempdir()?;
        let repo_dir = clone(dir.path(), self.transport(), &self.url, &self.branch).map_err(
            |source| Error::Cloning {
                url: self.url.clone(),
                source,
            },
        )?;

        configure_identity(&repo_dir, &config)?;
        let notes_ref = resolve_notes_ref(&repo_dir, &config.notes_ref)?;
        fetch_notes(&repo_dir, self.transport(), &self.url, &notes_ref)?;

        info!(url = %self.url, dir = %repo_dir.display(), "cloned config repo");
        Ok(Checkout {
            repo: self.clone(),
            config,
            dir: Some(dir),
            repo_dir,
            notes_ref,
        })
    }
}

/// Values used when working in a local copy of the repo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub sync_tag: String,
    /// Shorthand is fine, e.g. `tideway` for `refs/notes/tideway`.
    pub notes_ref: String,
    pub user_name: String,
    pub user_email: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_tag: "tideway-sync".to_string(),
            notes_ref: "tideway".to_string(),
            user_name: "Tideway".to_string(),
            user_email: "support@tideway.invalid".to_string(),
        }
    }
}

/// A local clone of a [`Repo`].
///
/// The clone lives in a temporary directory owned by this value; it is
/// removed by [`Checkout::clean`] or when the value is dropped.
#[derive(Debug, Default)]
pub struct Checkout {
    repo: Repo,
    config: Config,
    dir: Option<TempDir>,
    repo_dir: PathBuf,
    notes_ref: String,
}

impl Checkout {
    /// Make another clone of this checkout, e.g. for rewriting files while
    /// this one stays pristine for reading. It pushes to the same remote.
    pub fn working_clone(&self) -> Result<Checkout> {
        let dir = tempfile::Builder::new()
            .prefix("tideway-working")
            .tempdir()?;
        let source = self.repo_dir.to_string_lossy().into_owned();
        let repo_dir = clone(dir.path(), Transport::LOCAL, &source, &self.repo.branch)
            .map_err(|e| Error::git("git clone (working)", e))?;

        configure_identity(&repo_dir, &self.config)?;
        fetch_notes(&repo_dir, Transport::LOCAL, &source, &self.notes_ref)?;

        Ok(Checkout {
            repo: self.repo.clone(),
            config: self.config.clone(),
            dir: Some(dir),
            repo_dir,
            notes_ref: self.notes_ref.clone(),
        })
    }

    /// Remove the clone. Safe to call more than once.
    pub fn clean(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                warn!(dir = %path.display(), error = %err, "failed to remove checkout");
            }
        }
        self.repo_dir = PathBuf::new();
    }

    pub fn dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Full name of the notes ref, resolved at clone time.
    pub fn notes_ref(&self) -> &str {
        &self.notes_ref
    }

    /// Where the manifests live. Nothing outside it is committed.
    pub fn manifest_dir(&self) -> PathBuf {
        self.repo_dir.join(&self.repo.path)
    }

    /// Commit local changes, attach `note` to the new commit, and push both.
    /// Returns the new commit.
    ///
    /// Returns [`Error::NoChanges`] when nothing under the manifest path
    /// changed.
    pub fn commit_and_push(&self, message: &str, note: Option<&Note>) -> Result<String> {
        if !self.has_changes() {
            return Err(Error::NoChanges);
        }
        self.git(&["commit", "--no-verify", "-a", "-m", message])
            .map_err(|e| Error::git("git commit", e))?;

        let rev = self.head_revision()?;
        if let Some(note) = note {
            self.put(&rev, note)?;
        }

        let branch = self.branch_or_head();
        let mut refs = vec![branch];
        if self.ref_exists(&self.notes_ref) {
            refs.push(&self.notes_ref);
        }
        let mut args = vec!["push", self.repo.url.as_str()];
        args.extend(refs);
        exec::run(&self.repo_dir, self.repo.transport(), &args).map_err(|source| {
            Error::Push {
                url: self.repo.url.clone(),
                source,
            }
        })?;

        info!(url = %self.repo.url, branch, %rev, "pushed commit");
        Ok(rev)
    }

    /// Fast-forward to the remote branch and pick up new notes.
    pub fn pull(&self) -> Result<()> {
        let branch = self.branch_or_head();
        exec::run(
            &self.repo_dir,
            self.repo.transport(),
            &["pull", "--ff-only", &self.repo.url, branch],
        )
        .map_err(|e| Error::git(format!("git pull --ff-only {} {}", self.repo.url, branch), e))?;

        fetch_notes(
            &self.repo_dir,
            self.repo.transport(),
            &self.repo.url,
            &self.notes_ref,
        )
    }

    /// The note attached to `rev`, if there is one.
    pub fn get_note(&self, rev: &str) -> Result<Option<Note>> {
        let commit = self.resolve_commit(rev)?;
        let listing = self
            .git(&["notes", "--ref", &self.notes_ref, "list"])
            .map_err(|e| Error::git("git notes list", e))?;
        // Each line is "<note blob> <annotated object>".
        let annotated = listing
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|object| object == commit);
        if !annotated {
            return Ok(None);
        }

        let body = self
            .git(&["notes", "--ref", &self.notes_ref, "show", &commit])
            .map_err(|e| Error::git(format!("git notes show {rev}"), e))?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|source| Error::NoteDecode {
                rev: rev.to_string(),
                source,
            })
    }

    pub fn head_revision(&self) -> Result<String> {
        self.git(&["rev-list", "--max-count", "1", "HEAD"])
            .map(|out| out.trim().to_string())
            .map_err(|e| Error::git("git rev-list HEAD", e))
    }

    /// Commits reachable from `to` but not from `from`, newest first.
    pub fn revisions_between(&self, from: &str, to: &str) -> Result<Vec<String>> {
        self.rev_list(&format!("{from}..{to}"))
    }

    /// `rev` and all its ancestors, newest first.
    pub fn revisions_before(&self, rev: &str) -> Result<Vec<String>> {
        self.rev_list(rev)
    }

    /// Point the sync tag at `rev` and push it.
    ///
    /// The tag moves backwards as well as forwards, so both steps are forced.
    pub fn move_tag_and_push(&self, rev: &str, message: &str) -> Result<()> {
        let tag = self.config.sync_tag.as_str();
        self.git(&["tag", "--force", "-a", "-m", message, tag, rev])
            .map_err(|e| Error::git(format!("moving tag {tag}"), e))?;
        exec::run(
            &self.repo_dir,
            self.repo.transport(),
            &["push", "--force", &self.repo.url, "tag", tag],
        )
        .map_err(|source| Error::Push {
            url: self.repo.url.clone(),
            source,
        })?;

        debug!(tag, rev, "moved sync tag");
        Ok(())
    }

    /// Commit the sync tag points at, or `None` before the first sync.
    pub fn sync_tag_revision(&self) -> Result<Option<String>> {
        let tag_ref = format!("refs/tags/{}", self.config.sync_tag);
        if !self.ref_exists(&tag_ref) {
            return Ok(None);
        }
        self.resolve_commit(&tag_ref).map(Some)
    }

    /// Revisions up to `reference` that have not been applied yet.
    pub fn outstanding_revisions(&self, reference: &str) -> Result<Vec<String>> {
        match self.sync_tag_revision()? {
            Some(synced) => self.revisions_between(&synced, reference),
            None => self.revisions_before(reference),
        }
    }

    /// Every YAML file under the manifest path, in path order, as one
    /// multi-document stream.
    pub fn export_manifests(&self) -> Result<String> {
        let mut files = Vec::new();
        collect_manifests(&self.manifest_dir(), &mut files)?;
        files.sort();

        let mut out = String::new();
        for file in files {
            let body = std::fs::read_to_string(&file)?;
            out.push_str("---\n");
            out.push_str(&body);
            if !body.ends_with('\n') {
                out.push('\n');
            }
        }
        Ok(out)
    }

    fn git(&self, args: &[&str]) -> std::result::Result<String, CommandError> {
        exec::run(&self.repo_dir, Transport::LOCAL, args)
    }

    fn rev_list(&self, range: &str) -> Result<Vec<String>> {
        let out = self
            .git(&["rev-list", range])
            .map_err(|e| Error::git(format!("git rev-list {range}"), e))?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn resolve_commit(&self, rev: &str) -> Result<String> {
        let spec = format!("{rev}^{{commit}}");
        self.git(&["rev-parse", "--verify", &spec])
            .map(|out| out.trim().to_string())
            .map_err(|e| Error::git(format!("resolving {rev}"), e))
    }

    fn ref_exists(&self, name: &str) -> bool {
        self.git(&["rev-parse", "--verify", "--quiet", name]).is_ok()
    }

    fn branch_or_head(&self) -> &str {
        if self.repo.branch.is_empty() {
            "HEAD"
        } else {
            &self.repo.branch
        }
    }

    fn has_changes(&self) -> bool {
        let path = if self.repo.path.is_empty() {
            "."
        } else {
            self.repo.path.as_str()
        };
        // `--quiet` exits 1 when there are differences.
        self.git(&["diff", "--quiet", "--", path]).is_err()
    }
}

impl NoteStore for Checkout {
    fn put(&self, rev: &str, note: &Note) -> Result<()> {
        let body = serde_json::to_string(note)?;
        self.git(&["notes", "--ref", &self.notes_ref, "add", "-m", &body, rev])
            .map_err(|e| Error::git(format!("adding note to {rev}"), e))?;
        Ok(())
    }

    fn get(&self, rev: &str) -> Result<Option<Note>> {
        self.get_note(rev)
    }
}

fn clone(
    working_dir: &Path,
    transport: Transport<'_>,
    url: &str,
    branch: &str,
) -> std::result::Result<PathBuf, CommandError> {
    let repo_dir = working_dir.join("repo");
    let target = repo_dir.to_string_lossy().into_owned();
    let mut args = vec!["clone"];
    if !branch.is_empty() {
        args.extend(["--branch", branch]);
    }
    args.extend([url, target.as_str()]);
    exec::run(working_dir, transport, &args)?;
    Ok(repo_dir)
}

fn configure_identity(repo_dir: &Path, config: &Config) -> Result<()> {
    for (key, value) in [
        ("user.name", &config.user_name),
        ("user.email", &config.user_email),
    ] {
        exec::run(repo_dir, Transport::LOCAL, &["config", key, value])
            .map_err(|e| Error::git("setting git config", e))?;
    }
    Ok(())
}

fn resolve_notes_ref(repo_dir: &Path, shorthand: &str) -> Result<String> {
    exec::run(
        repo_dir,
        Transport::LOCAL,
        &["notes", "--ref", shorthand, "get-ref"],
    )
    .map(|out| out.trim().to_string())
    .map_err(|e| Error::git("resolving notes ref", e))
}

/// Update the local notes ref from `upstream`. A repo nobody has annotated
/// yet has no notes ref, which is fine.
fn fetch_notes(
    repo_dir: &Path,
    transport: Transport<'_>,
    upstream: &str,
    notes_ref: &str,
) -> Result<()> {
    let refspec = format!("{notes_ref}:{notes_ref}");
    match exec::run(repo_dir, transport, &["fetch", upstream, &refspec]) {
        Ok(_) => Ok(()),
        Err(err) if err.is_missing_remote_ref() => {
            debug!(upstream, notes_ref, "no notes upstream yet");
            Ok(())
        }
        Err(err) => Err(Error::git(format!("git fetch {upstream} {refspec}"), err)),
    }
}

fn collect_manifests(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|name| name == ".git") {
                continue;
            }
            collect_manifests(&path, files)?;
        } else if matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        ) {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn narrow_key_permissions(key: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(key)?.permissions().mode() & 0o777;
    if mode != 0o400 {
        std::fs::set_permissions(key, std::fs::Permissions::from_mode(0o400))?;
        debug!(key = %key.display(), mode = %format!("{mode:o}"), "narrowed key permissions");
    }
    Ok(())
}

#[cfg(not(unix))]
fn narrow_key_permissions(key: &Path) -> Result<()> {
    std::fs::metadata(key)?;
    Ok(())
}
