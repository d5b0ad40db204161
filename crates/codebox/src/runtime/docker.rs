use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, DownloadFromContainerOptions,
    ListContainersOptions, RemoveContainerOptions, StartContainerOptions,
    UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{
    BuildImageOptions, CommitContainerOptions, CreateImageOptions, RemoveImageOptions,
};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::{StreamExt, stream};
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::runtime::{
    ContainerRuntime, ContainerSummary, ExecRequest, ExecStream, ImageInfo, RuntimeError,
    archive, short_id, split_reference,
};

const EXIT_CODE_POLLS: u32 = 50;
const EXIT_CODE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Container runtime backed by a Docker daemon
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to a Docker daemon
    ///
    /// `host` accepts `unix://` socket paths and `tcp://`/`http://` URLs.
    /// Without a host, DOCKER_HOST and then the local socket are used.
    pub fn connect(host: Option<&str>, timeout: Duration) -> Result<Self, RuntimeError> {
        let secs = timeout.as_secs();
        let docker = match host {
            None => Docker::connect_with_local_defaults(),
            #[cfg(unix)]
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_unix(host, secs, API_DEFAULT_VERSION)
            }
            Some(host) => Docker::connect_with_http(host, secs, API_DEFAULT_VERSION),
        }
        .map_err(RuntimeError::Connect)?;

        Ok(Self {
            docker: docker.with_timeout(timeout),
        })
    }

    /// Connect using the daemon address and API timeout from a config
    pub fn from_config(config: &Config) -> Result<Self, RuntimeError> {
        Self::connect(config.docker_host.as_deref(), config.api_timeout())
    }

    /// Wrap an existing client
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Underlying bollard client
    pub fn client(&self) -> &Docker {
        &self.docker
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, reference: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(error) if is_not_found(&error) => Ok(false),
            Err(source) => Err(api("inspect_image", source)),
        }
    }

    async fn get_image(&self, reference: &str) -> Result<ImageInfo, RuntimeError> {
        match self.docker.inspect_image(reference).await {
            Ok(inspect) => Ok(ImageInfo {
                id: inspect.id.unwrap_or_default(),
                tags: inspect.repo_tags.unwrap_or_default(),
            }),
            Err(error) if is_not_found(&error) => {
                Err(RuntimeError::ImageNotFound(reference.to_string()))
            }
            Err(source) => Err(api("inspect_image", source)),
        }
    }

    #[instrument(skip(self))]
    async fn pull_image(&self, reference: &str) -> Result<ImageInfo, RuntimeError> {
        let (repository, tag) = split_reference(reference);
        let options = CreateImageOptions {
            from_image: repository,
            tag,
            ..Default::default()
        };

        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            let progress = match progress {
                Ok(progress) => progress,
                Err(error) if is_not_found(&error) => {
                    return Err(RuntimeError::ImageNotFound(reference.to_string()));
                }
                Err(source) => return Err(api("create_image", source)),
            };
            if let Some(status) = progress.status {
                debug!(%status, "pull");
            }
        }

        self.get_image(reference).await
    }

    #[instrument(skip(self))]
    async fn build_image(&self, dockerfile: &Path, tag: &str) -> Result<ImageInfo, RuntimeError> {
        let context_dir = dockerfile
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        let dockerfile_name = dockerfile
            .file_name()
            .ok_or_else(|| RuntimeError::InvalidPath(dockerfile.display().to_string()))?
            .to_string_lossy()
            .into_owned();

        let context = tokio::task::spawn_blocking(move || archive::pack_dir(&context_dir))
            .await
            .map_err(std::io::Error::other)??;
        debug!(len = context.len(), "packed build context");

        let options = BuildImageOptions {
            dockerfile: dockerfile_name,
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut build = self.docker.build_image(options, None, Some(context.into()));
        while let Some(info) = build.next().await {
            let info = info.map_err(|source| api("build_image", source))?;
            if let Some(error) = info.error {
                return Err(RuntimeError::BuildFailed(error));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!(line, "build");
                }
            }
        }

        self.get_image(tag).await
    }

    #[instrument(skip(self))]
    async fn remove_image(&self, reference: &str) -> Result<(), RuntimeError> {
        let options = RemoveImageOptions {
            force: false,
            noprune: false,
        };
        match self
            .docker
            .remove_image(reference, Some(options), None)
            .await
        {
            Ok(_) => Ok(()),
            Err(error) if is_not_found(&error) => {
                Err(RuntimeError::ImageNotFound(reference.to_string()))
            }
            Err(source) => Err(api("remove_image", source)),
        }
    }

    #[instrument(skip(self))]
    async fn run_container(&self, image: &str) -> Result<String, RuntimeError> {
        // tty + open stdin keeps the default shell entrypoint alive
        let config = ContainerConfig {
            image: Some(image.to_string()),
            tty: Some(true),
            open_stdin: Some(true),
            ..Default::default()
        };

        let container = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|source| api("create_container", source))?;
        for warning in &container.warnings {
            warn!(%warning, "create_container");
        }

        if let Err(source) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            if let Err(error) = self.remove_container(&container.id).await {
                warn!(container = short_id(&container.id), %error, "failed to remove unstarted container");
            }
            return Err(api("start_container", source));
        }

        Ok(container.id)
    }

    #[instrument(skip(self))]
    async fn commit_container(&self, container: &str, reference: &str) -> Result<(), RuntimeError> {
        let (repository, tag) = split_reference(reference);
        let options = CommitContainerOptions {
            container: container.to_string(),
            repo: repository.to_string(),
            tag: tag.to_string(),
            pause: true,
            ..Default::default()
        };

        self.docker
            .commit_container(options, ContainerConfig::<String>::default())
            .await
            .map_err(|source| api("commit_container", source))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, container: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(container, Some(options)).await {
            Ok(()) => Ok(()),
            Err(error) if is_not_found(&error) => {
                Err(RuntimeError::ContainerNotFound(container.to_string()))
            }
            Err(source) => Err(api("remove_container", source)),
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|source| api("list_containers", source))?;

        Ok(containers
            .into_iter()
            .map(|container| ContainerSummary {
                id: container.id.unwrap_or_default(),
                image_id: container.image_id.unwrap_or_default(),
            })
            .collect())
    }

    async fn exec(&self, container: &str, request: ExecRequest) -> Result<ExecStream, RuntimeError> {
        let options = CreateExecOptions {
            cmd: Some(request.command),
            working_dir: request.workdir,
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = match self.docker.create_exec(container, options).await {
            Ok(exec) => exec,
            Err(error) if is_not_found(&error) => {
                return Err(RuntimeError::ContainerNotFound(container.to_string()));
            }
            Err(source) => return Err(api("create_exec", source)),
        };

        let output = match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|source| api("start_exec", source))?
        {
            StartExecResults::Attached { output, .. } => output
                .map(|chunk| {
                    chunk
                        .map(|log| log.into_bytes().to_vec())
                        .map_err(|source| api("exec output", source))
                })
                .boxed(),
            StartExecResults::Detached => stream::empty().boxed(),
        };

        Ok(ExecStream {
            id: exec.id,
            output,
        })
    }

    /// Polls until the daemon stops reporting the exec as running
    #[instrument(skip(self))]
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError> {
        for _ in 0..EXIT_CODE_POLLS {
            let inspect = self
                .docker
                .inspect_exec(exec_id)
                .await
                .map_err(|source| api("inspect_exec", source))?;
            if let Some(exit_code) = finished_exit_code(inspect.running, inspect.exit_code) {
                return Ok(exit_code);
            }
            tokio::time::sleep(EXIT_CODE_POLL_INTERVAL).await;
        }

        warn!(exec = short_id(exec_id), "exec still running, exit code unknown");
        Ok(None)
    }

    #[instrument(skip(self))]
    async fn get_archive(&self, container: &str, path: &str) -> Result<Option<Vec<u8>>, RuntimeError> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut download = self.docker.download_from_container(container, Some(options));

        let mut archive = Vec::new();
        while let Some(chunk) = download.next().await {
            match chunk {
                Ok(bytes) => archive.extend_from_slice(&bytes),
                Err(error) if is_not_found(&error) => return Ok(None),
                Err(source) => return Err(api("download_from_container", source)),
            }
        }

        debug!(len = archive.len(), "downloaded archive");
        Ok((!archive.is_empty()).then_some(archive))
    }

    #[instrument(skip(self, archive), fields(len = archive.len()))]
    async fn put_archive(
        &self,
        container: &str,
        directory: &str,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        let options = UploadToContainerOptions {
            path: directory.to_string(),
            ..Default::default()
        };
        match self
            .docker
            .upload_to_container(container, Some(options), archive.into())
            .await
        {
            Ok(()) => Ok(()),
            Err(error) if is_not_found(&error) => {
                Err(RuntimeError::InvalidPath(directory.to_string()))
            }
            Err(source) => Err(api("upload_to_container", source)),
        }
    }
}

fn api(operation: &'static str, source: BollardError) -> RuntimeError {
    RuntimeError::Api { operation, source }
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Exit code of an exec that is no longer running, `None` while it runs
fn finished_exit_code(running: Option<bool>, exit_code: Option<i64>) -> Option<Option<i64>> {
    (running != Some(true)).then_some(exit_code)
}
