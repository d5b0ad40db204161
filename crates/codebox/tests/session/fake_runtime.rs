//! In-memory container runtime
//!
//! Records every call and emulates just enough of a container: a file map,
//! a directory set, `test -d`/`mkdir -p`, and scripted command results.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use codebox::runtime::{ContainerSummary, ExecRequest, ExecStream};
use codebox::{ContainerRuntime, ImageInfo, RuntimeError};
use futures::{StreamExt, stream};
use tar::{Archive, Builder, EntryType, Header};

/// A runtime call, in the order it was made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ImageExists(String),
    GetImage(String),
    Pull(String),
    Build { dockerfile: PathBuf, tag: String },
    RemoveImage(String),
    RunContainer(String),
    Commit { container: String, reference: String },
    RemoveContainer(String),
    ListContainers,
    Exec { command: String, workdir: Option<String> },
    GetArchive(String),
    PutArchive { directory: String },
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    output: String,
    exit_code: i64,
    hang: bool,
}

#[derive(Debug)]
struct Container {
    image_id: String,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct State {
    images: BTreeMap<String, ImageInfo>,
    containers: BTreeMap<String, Container>,
    rules: Vec<Rule>,
    exit_codes: HashMap<String, Option<i64>>,
    pull_aliases: HashMap<String, String>,
    calls: Vec<Call>,
    fail_run_container: bool,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make an image available locally
    pub fn add_image(&self, reference: &str) -> ImageInfo {
        let image = image_info(reference);
        self.state
            .lock()
            .unwrap()
            .images
            .insert(reference.to_string(), image.clone());
        image
    }

    /// Script the result of commands containing `pattern` (first match wins)
    pub fn on_command(&self, pattern: &str, output: &str, exit_code: i64) {
        self.state.lock().unwrap().rules.push(Rule {
            pattern: pattern.to_string(),
            output: output.to_string(),
            exit_code,
            hang: false,
        });
    }

    /// Commands containing `pattern` print `output` and never finish
    pub fn hang_on(&self, pattern: &str, output: &str) {
        self.state.lock().unwrap().rules.push(Rule {
            pattern: pattern.to_string(),
            output: output.to_string(),
            exit_code: 0,
            hang: true,
        });
    }

    /// Pulling `reference` yields an image already tagged `alias` locally
    pub fn alias_on_pull(&self, reference: &str, alias: &str) {
        self.state
            .lock()
            .unwrap()
            .pull_aliases
            .insert(reference.to_string(), alias.to_string());
    }

    pub fn fail_run_container(&self) {
        self.state.lock().unwrap().fail_run_container = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Shell commands executed so far
    pub fn executed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Exec { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Number of calls matching `predicate`
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(*call)).count()
    }

    /// Index of the first call matching `predicate`
    pub fn position(&self, predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(predicate)
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.state.lock().unwrap().images.contains_key(reference)
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    /// Content of a file in any container
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .values()
            .find_map(|container| container.files.get(path).cloned())
    }

    /// Place a file directly in every running container
    pub fn seed_file(&self, path: &str, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        for container in state.containers.values_mut() {
            container.files.insert(path.to_string(), content.to_vec());
        }
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn image_info(reference: &str) -> ImageInfo {
    ImageInfo {
        id: format!("sha256:{reference}"),
        tags: vec![reference.to_string()],
    }
}

fn join(directory: &str, name: &str) -> String {
    format!("{}/{}", directory.trim_end_matches('/'), name)
}

fn unquote(word: &str) -> String {
    word.trim()
        .strip_prefix('\'')
        .and_then(|word| word.strip_suffix('\''))
        .unwrap_or(word.trim())
        .to_string()
}

fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, reference: &str) -> Result<bool, RuntimeError> {
        self.record(Call::ImageExists(reference.to_string()));
        Ok(self.has_image(reference))
    }

    async fn get_image(&self, reference: &str) -> Result<ImageInfo, RuntimeError> {
        self.record(Call::GetImage(reference.to_string()));
        self.state
            .lock()
            .unwrap()
            .images
            .get(reference)
            .cloned()
            .ok_or_else(|| RuntimeError::ImageNotFound(reference.to_string()))
    }

    async fn pull_image(&self, reference: &str) -> Result<ImageInfo, RuntimeError> {
        self.record(Call::Pull(reference.to_string()));
        let mut state = self.state.lock().unwrap();
        let image = match state.pull_aliases.get(reference).cloned() {
            Some(alias) => {
                let image = ImageInfo {
                    id: format!("sha256:{alias}"),
                    tags: vec![reference.to_string(), alias.clone()],
                };
                state.images.insert(alias, image.clone());
                image
            }
            None => image_info(reference),
        };
        state.images.insert(reference.to_string(), image.clone());
        Ok(image)
    }

    async fn build_image(&self, dockerfile: &Path, tag: &str) -> Result<ImageInfo, RuntimeError> {
        self.record(Call::Build {
            dockerfile: dockerfile.to_path_buf(),
            tag: tag.to_string(),
        });
        if !dockerfile.is_file() {
            return Err(RuntimeError::BuildFailed(format!(
                "cannot read {}",
                dockerfile.display()
            )));
        }
        Ok(self.add_image(tag))
    }

    async fn remove_image(&self, reference: &str) -> Result<(), RuntimeError> {
        self.record(Call::RemoveImage(reference.to_string()));
        self.state
            .lock()
            .unwrap()
            .images
            .remove(reference)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::ImageNotFound(reference.to_string()))
    }

    async fn run_container(&self, image: &str) -> Result<String, RuntimeError> {
        self.record(Call::RunContainer(image.to_string()));
        let mut state = self.state.lock().unwrap();
        if state.fail_run_container {
            return Err(RuntimeError::ContainerNotFound("unstarted".to_string()));
        }
        let image_id = state
            .images
            .get(image)
            .map(|image| image.id.clone())
            .ok_or_else(|| RuntimeError::ImageNotFound(image.to_string()))?;

        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        let dirs = ["/", "/tmp"].into_iter().map(String::from).collect();
        state.containers.insert(
            id.clone(),
            Container {
                image_id,
                files: BTreeMap::new(),
                dirs,
            },
        );
        Ok(id)
    }

    async fn commit_container(&self, container: &str, reference: &str) -> Result<(), RuntimeError> {
        self.record(Call::Commit {
            container: container.to_string(),
            reference: reference.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        if !state.containers.contains_key(container) {
            return Err(RuntimeError::ContainerNotFound(container.to_string()));
        }
        state
            .images
            .entry(reference.to_string())
            .or_insert_with(|| image_info(reference));
        Ok(())
    }

    async fn remove_container(&self, container: &str) -> Result<(), RuntimeError> {
        self.record(Call::RemoveContainer(container.to_string()));
        self.state
            .lock()
            .unwrap()
            .containers
            .remove(container)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::ContainerNotFound(container.to_string()))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.record(Call::ListContainers);
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .map(|(id, container)| ContainerSummary {
                id: id.clone(),
                image_id: container.image_id.clone(),
            })
            .collect())
    }

    async fn exec(&self, container: &str, request: ExecRequest) -> Result<ExecStream, RuntimeError> {
        let command = request
            .shell_command()
            .map(str::to_string)
            .unwrap_or_else(|| request.command.join(" "));
        self.record(Call::Exec {
            command: command.clone(),
            workdir: request.workdir.clone(),
        });

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let exec_id = format!("exec-{}", state.next_id);
        let rule = state
            .rules
            .iter()
            .find(|rule| command.contains(&rule.pattern))
            .cloned();
        let target = state
            .containers
            .get_mut(container)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container.to_string()))?;

        let (output, exit_code, hang) = if let Some(dir) = command.strip_prefix("test -d ") {
            let exists = target.dirs.contains(&unquote(dir));
            (String::new(), if exists { 0 } else { 1 }, false)
        } else if let Some(dir) = command.strip_prefix("mkdir -p ") {
            let mut path = String::new();
            for part in unquote(dir).split('/').filter(|part| !part.is_empty()) {
                path = format!("{path}/{part}");
                target.dirs.insert(path.clone());
            }
            (String::new(), 0, false)
        } else if let Some(rule) = rule {
            (rule.output, rule.exit_code, rule.hang)
        } else {
            (String::new(), 0, false)
        };

        state.exit_codes.insert(exec_id.clone(), Some(exit_code));

        // Split output in two chunks to exercise concatenation
        let bytes = output.into_bytes();
        let middle = bytes.len() / 2;
        let chunks: Vec<Result<Vec<u8>, RuntimeError>> = [&bytes[..middle], &bytes[middle..]]
            .into_iter()
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        let output = if hang {
            stream::iter(chunks).chain(stream::pending()).boxed()
        } else {
            stream::iter(chunks).boxed()
        };

        Ok(ExecStream {
            id: exec_id,
            output,
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .exit_codes
            .get(exec_id)
            .copied()
            .flatten())
    }

    async fn get_archive(&self, container: &str, path: &str) -> Result<Option<Vec<u8>>, RuntimeError> {
        self.record(Call::GetArchive(path.to_string()));
        let state = self.state.lock().unwrap();
        let target = state
            .containers
            .get(container)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container.to_string()))?;

        let root = base_name(path);
        let mut builder = Builder::new(Vec::new());
        if let Some(content) = target.files.get(path) {
            append_file(&mut builder, root, content);
        } else if target.dirs.contains(path) {
            append_dir(&mut builder, root);
            let prefix = format!("{}/", path.trim_end_matches('/'));
            for (file, content) in &target.files {
                if let Some(relative) = file.strip_prefix(&prefix) {
                    append_file(&mut builder, &format!("{root}/{relative}"), content);
                }
            }
        } else {
            return Ok(None);
        }
        Ok(Some(builder.into_inner().unwrap()))
    }

    async fn put_archive(
        &self,
        container: &str,
        directory: &str,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        self.record(Call::PutArchive {
            directory: directory.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        let target = state
            .containers
            .get_mut(container)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container.to_string()))?;
        if !target.dirs.contains(directory) {
            return Err(RuntimeError::InvalidPath(directory.to_string()));
        }

        let mut archive = Archive::new(archive.as_slice());
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.display().to_string();
            let path = join(directory, name.trim_end_matches('/'));
            if entry.header().entry_type() == EntryType::Directory {
                target.dirs.insert(path);
            } else {
                let mut content = Vec::new();
                entry.read_to_end(&mut content)?;
                target.files.insert(path, content);
            }
        }
        Ok(())
    }
}

fn append_file(builder: &mut Builder<Vec<u8>>, name: &str, content: &[u8]) {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, name, content).unwrap();
}

fn append_dir(builder: &mut Builder<Vec<u8>>, name: &str) {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    builder
        .append_data(&mut header, format!("{name}/"), std::io::empty())
        .unwrap();
}
