//! Process-backed job runner.
//!
//! Runs the configured build program inside the job's working directory,
//! streams its output into the job log, then zips the `dist` directory into
//! `<job-id>.zip`, which becomes the downloadable artifact.
//!
//! Progress plan: 5 preparing, 10..=85 while the build prints output,
//! 90 packaging, 100 packaged.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use kiln_core::domain::{ArtifactRef, ProgressEvent, RunnerError};
use kiln_core::ports::{JobContext, JobRunner, ProgressReporter};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

const BUILD_START: u8 = 10;
const BUILD_CEILING: u8 = 85;

/// Program and argument template of the build step.
///
/// Placeholders replaced in every argument: `{source}`, `{dist}`, `{work}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            program: "pyinstaller".to_string(),
            args: "--onefile --distpath {dist} --workpath {work} {source}"
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        }
    }
}

pub struct CommandRunner {
    settings: RunnerSettings,
}

impl CommandRunner {
    pub fn new(settings: RunnerSettings) -> Self {
        Self { settings }
    }

    /// Final argument list for one job: the rendered template followed by
    /// `options.extra_args`.
    pub fn render_args(&self, ctx: &JobContext) -> Result<Vec<String>, RunnerError> {
        let dist = dist_dir(&ctx.work_dir);
        let work = ctx.work_dir.join("build");
        let mut args: Vec<String> = self
            .settings
            .args
            .iter()
            .map(|arg| {
                arg.replace("{source}", &ctx.input.source)
                    .replace("{dist}", &dist.to_string_lossy())
                    .replace("{work}", &work.to_string_lossy())
            })
            .collect();

        if let Some(extra) = ctx.input.options.get("extra_args") {
            let extra = extra
                .as_array()
                .ok_or_else(|| RunnerError::Failed("options.extra_args must be an array".into()))?;
            for value in extra {
                let arg = value.as_str().ok_or_else(|| {
                    RunnerError::Failed("options.extra_args must contain only strings".into())
                })?;
                args.push(arg.to_string());
            }
        }
        Ok(args)
    }
}

fn dist_dir(work_dir: &Path) -> PathBuf {
    work_dir.join("dist")
}

#[async_trait]
impl JobRunner for CommandRunner {
    async fn run(
        &self,
        ctx: JobContext,
        mut progress: ProgressReporter,
    ) -> Result<ArtifactRef, RunnerError> {
        let program = &self.settings.program;
        let args = self.render_args(&ctx)?;

        progress
            .report(
                ProgressEvent::new(5, "preparing build")
                    .with_log(format!("$ {program} {}", args.join(" "))),
            )
            .await;

        let mut child = Command::new(program)
            .args(&args)
            .current_dir(&ctx.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // タイムアウトで runner タスクが abort されたらプロセスも殺す
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Failed(format!("could not start {program}: {e}")))?;

        // stdout / stderr を 1 本のチャネルに合流させる
        let (tx, mut rx) = mpsc::channel::<String>(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        progress
            .report(ProgressEvent::new(BUILD_START, "building"))
            .await;

        let mut percent = BUILD_START;
        let mut last_line = None;
        while let Some(line) = rx.recv().await {
            percent = (percent + 1).min(BUILD_CEILING);
            progress
                .report(ProgressEvent::new(percent, "building").with_log(line.clone()))
                .await;
            last_line = Some(line);
        }

        let status = child.wait().await?;
        if !status.success() {
            let detail = last_line.map(|l| format!(": {l}")).unwrap_or_default();
            return Err(RunnerError::Failed(format!(
                "{program} failed ({status}){detail}"
            )));
        }

        progress
            .report(ProgressEvent::new(90, "packaging output").with_log("zipping dist"))
            .await;

        let filename = format!("{}.zip", ctx.id);
        let dist = dist_dir(&ctx.work_dir);
        let archive = ctx.work_dir.join(&filename);
        let files = tokio::task::spawn_blocking(move || zip_dir(&dist, &archive))
            .await
            .map_err(|e| RunnerError::Failed(format!("packaging task failed: {e}")))??;

        progress
            .report(
                ProgressEvent::new(100, "packaged")
                    .with_log(format!("packaged {files} file(s) into {filename}")),
            )
            .await;
        tracing::debug!(job_id = %ctx.id, files, "build packaged");

        Ok(ArtifactRef::new(filename))
    }
}

/// Forward output lines until EOF. Bytes that are not UTF-8 are replaced,
/// never fatal: dropping the pipe early would kill the build with SIGPIPE.
async fn forward_lines(reader: impl AsyncRead + Unpin, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut receiver_gone = false;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if receiver_gone {
                    continue;
                }
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send(line).await.is_err() {
                    // 受け手が居なくても EOF までは読み続ける
                    receiver_gone = true;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "build output stream ended");
                break;
            }
        }
    }
}

/// Zip every file under `src` into `dest`. Returns the number of files.
fn zip_dir(src: &Path, dest: &Path) -> Result<usize, RunnerError> {
    if !src.is_dir() {
        return Err(RunnerError::Failed(
            "build produced no output directory".to_string(),
        ));
    }

    let mut writer = zip::ZipWriter::new(File::create(dest)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let zip_err = |e: zip::result::ZipError| RunnerError::Failed(format!("zip error: {e}"));

    let mut files = 0;
    let mut pending = vec![src.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = std::fs::read_dir(&dir)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.file_name());
        for entry in entries {
            let path = entry.path();
            let name = entry_name(src, &path);
            if entry.file_type()?.is_dir() {
                writer.add_directory(format!("{name}/"), options).map_err(zip_err)?;
                pending.push(path);
            } else {
                writer.start_file(name, options).map_err(zip_err)?;
                std::io::copy(&mut File::open(&path)?, &mut writer)?;
                files += 1;
            }
        }
    }
    writer.finish().map_err(zip_err)?;
    Ok(files)
}

/// Archive entry name: path relative to `root`, `/`-separated.
fn entry_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use kiln_core::domain::{JobInput, JobRecord};
    use kiln_core::impls::InMemoryStateStore;
    use kiln_core::ports::{IdGenerator, StateStore, SystemClock, UlidGenerator};
    use std::sync::Arc;

    struct Job {
        _tmp: tempfile::TempDir,
        store: Arc<InMemoryStateStore>,
        ctx: JobContext,
    }

    async fn job(input: JobInput) -> Job {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStateStore::new());
        let id = UlidGenerator::new(SystemClock).generate_job_id();
        store.put(JobRecord::new(id, chrono::Utc::now())).await.unwrap();
        let ctx = JobContext {
            id,
            input,
            work_dir: tmp.path().to_path_buf(),
        };
        Job {
            _tmp: tmp,
            store,
            ctx,
        }
    }

    fn shell(script: &str) -> CommandRunner {
        CommandRunner::new(RunnerSettings {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        })
    }

    #[tokio::test]
    async fn successful_build_is_zipped() {
        let job = job(JobInput::new("app.py")).await;
        let runner = shell("mkdir -p {dist}/lib && echo bin > {dist}/app && echo so > {dist}/lib/x.so && echo built {source}");
        let reporter = ProgressReporter::new(job.ctx.id, job.store.clone());

        let artifact = runner.run(job.ctx.clone(), reporter).await.unwrap();
        assert_eq!(artifact.filename, format!("{}.zip", job.ctx.id));

        let file = File::open(job.ctx.work_dir.join(&artifact.filename)).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        assert!(archive.by_name("app").is_ok());
        assert!(archive.by_name("lib/x.so").is_ok());

        let record = job.store.get(&job.ctx.id).await.unwrap().unwrap();
        assert_eq!(record.progress, 100);
        assert!(record.log.iter().any(|l| l == "built app.py"));
    }

    #[tokio::test]
    async fn failing_build_reports_status_and_last_line() {
        let job = job(JobInput::new("app.py")).await;
        let runner = shell("echo compiling; echo 'SyntaxError: bad' >&2; exit 3");
        let reporter = ProgressReporter::new(job.ctx.id, job.store.clone());

        let err = runner.run(job.ctx.clone(), reporter).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("sh failed"), "{message}");
        assert!(message.contains('3'), "{message}");

        let record = job.store.get(&job.ctx.id).await.unwrap().unwrap();
        assert!(record.progress >= BUILD_START && record.progress <= BUILD_CEILING);
        assert!(record.log.iter().any(|l| l == "SyntaxError: bad"));
    }

    #[tokio::test]
    async fn non_utf8_output_does_not_break_the_build() {
        let job = job(JobInput::new("app.py")).await;
        let runner = shell(
            "printf 'caf\\351\\n'; i=0; while [ $i -lt 2000 ]; do echo line $i; i=$((i+1)); done; \
             mkdir -p {dist} && echo bin > {dist}/app",
        );
        let reporter = ProgressReporter::new(job.ctx.id, job.store.clone());

        let artifact = runner.run(job.ctx.clone(), reporter).await.unwrap();
        assert_eq!(artifact.filename, format!("{}.zip", job.ctx.id));

        let record = job.store.get(&job.ctx.id).await.unwrap().unwrap();
        assert!(record.log.iter().any(|l| l == "caf\u{FFFD}"), "{:?}", &record.log[..3]);
        assert!(record.log.iter().any(|l| l == "line 1999"));
    }

    #[tokio::test]
    async fn missing_dist_is_a_failure() {
        let job = job(JobInput::new("app.py")).await;
        let runner = shell("true");
        let reporter = ProgressReporter::new(job.ctx.id, job.store.clone());

        let err = runner.run(job.ctx.clone(), reporter).await.unwrap_err();
        assert!(err.to_string().contains("no output directory"));
    }

    #[tokio::test]
    async fn unknown_program_fails_to_start() {
        let job = job(JobInput::new("app.py")).await;
        let runner = CommandRunner::new(RunnerSettings {
            program: "definitely-not-a-real-program".to_string(),
            args: vec![],
        });
        let reporter = ProgressReporter::new(job.ctx.id, job.store.clone());

        let err = runner.run(job.ctx.clone(), reporter).await.unwrap_err();
        assert!(err.to_string().contains("could not start"));
    }

    #[tokio::test]
    async fn template_and_extra_args_are_rendered() {
        let input = JobInput::new("src/app.py")
            .with_option("extra_args", serde_json::json!(["--noconsole"]));
        let job = job(input).await;
        let runner = CommandRunner::new(RunnerSettings::default());

        let args = runner.render_args(&job.ctx).unwrap();
        let dist = job.ctx.work_dir.join("dist");
        assert_eq!(args[0], "--onefile");
        assert_eq!(args[2], dist.to_string_lossy());
        assert_eq!(args[5], "src/app.py");
        assert_eq!(args.last().map(String::as_str), Some("--noconsole"));
    }

    #[tokio::test]
    async fn non_string_extra_args_are_rejected() {
        let input = JobInput::new("app.py").with_option("extra_args", serde_json::json!([1]));
        let job = job(input).await;
        let runner = CommandRunner::new(RunnerSettings::default());

        assert!(runner.render_args(&job.ctx).is_err());
    }
}
