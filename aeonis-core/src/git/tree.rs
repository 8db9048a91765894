//! File content and listings at a given commit

use std::path::Path;

use git2::{ErrorCode, ObjectType, TreeWalkMode, TreeWalkResult};

use super::repo::GitRepo;
use crate::{Error, Result};

impl GitRepo {
    /// UTF-8 content of `path` as of `rev`
    pub fn read_file_at_commit(&self, path: &str, rev: &str) -> Result<String> {
        let commit = self.resolve_commit(rev)?;
        let tree = commit.tree()?;

        let relative = path.trim_start_matches("./").trim_start_matches('/');
        let entry = tree.get_path(Path::new(relative)).map_err(|e| match e.code() {
            ErrorCode::NotFound => Error::NotFound(format!(
                "File '{}' not found at commit {}",
                path,
                commit.id()
            )),
            _ => Error::Git(e),
        })?;

        if entry.kind() != Some(ObjectType::Blob) {
            return Err(Error::NotFound(format!(
                "'{}' is not a file at commit {}",
                path,
                commit.id()
            )));
        }

        let blob = entry.to_object(self.inner())?.peel_to_blob()?;
        String::from_utf8(blob.content().to_vec())
            .map_err(|_| Error::InvalidData(format!("File '{}' is not valid UTF-8", path)))
    }

    /// Every tracked file path at `rev`, in tree order
    pub fn list_files_at_commit(&self, rev: &str) -> Result<Vec<String>> {
        let commit = self.resolve_commit(rev)?;
        let tree = commit.tree()?;

        let mut files = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    files.push(format!("{}{}", dir, name));
                }
            }
            TreeWalkResult::Ok
        })?;

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_history, RepoFixture};
    use tempfile::TempDir;

    #[test]
    fn test_read_file_at_older_commit() {
        let temp = TempDir::new().unwrap();
        let sample = sample_history(temp.path());

        let repo = GitRepo::open(temp.path()).unwrap();
        let parent = repo
            .resolve_commit(&sample.main_tip.to_string())
            .unwrap()
            .parent_id(0)
            .unwrap();

        let old = repo.read_file_at_commit("app.py", &parent.to_string()).unwrap();
        assert!(old.contains("return 1"));
        let new = repo.read_file_at_commit("app.py", &sample.main_tip.to_string()).unwrap();
        assert!(new.contains("return 2"));
    }

    #[test]
    fn test_read_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let sample = sample_history(temp.path());

        let repo = GitRepo::open(temp.path()).unwrap();
        // app.py does not exist yet at the root commit
        let result = repo.read_file_at_commit("app.py", &sample.root_commit.to_string());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_read_file_at_missing_commit() {
        let temp = TempDir::new().unwrap();
        sample_history(temp.path());

        let repo = GitRepo::open(temp.path()).unwrap();
        let result = repo.read_file_at_commit("app.py", "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_read_directory_is_not_found() {
        let temp = TempDir::new().unwrap();
        let fixture = RepoFixture::init(temp.path());
        let oid = fixture.commit("main", "src/lib.rs", "pub fn f() {}\n", "lib", 1_700_000_000);

        let repo = GitRepo::open(temp.path()).unwrap();
        let result = repo.read_file_at_commit("src", &oid.to_string());
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(repo.read_file_at_commit("./src/lib.rs", &oid.to_string()).is_ok());
    }

    #[test]
    fn test_list_files_includes_nested_paths() {
        let temp = TempDir::new().unwrap();
        let fixture = RepoFixture::init(temp.path());
        fixture.commit("main", "README.md", "hi\n", "readme", 1_700_000_000);
        let oid = fixture.commit("main", "src/api/routes.py", "pass\n", "routes", 1_700_000_100);

        let repo = GitRepo::open(temp.path()).unwrap();
        let mut files = repo.list_files_at_commit(&oid.to_string()).unwrap();
        files.sort();
        assert_eq!(files, vec!["README.md".to_string(), "src/api/routes.py".to_string()]);
    }
}
