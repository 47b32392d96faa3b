use std::path::Path;

use tokio::process::Command;

use i2v_worker::{PipelineBackend, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env()?;

    println!(
        "worker-selfcheck: starting with work_dir={} backend={:?}",
        config.work_dir.display(),
        config.pipeline_backend
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_ffmpeg().await?;
    ensure_env_present(&["UPLOADTHING_API_KEY"])?;

    match config.pipeline_backend {
        PipelineBackend::Command => ensure_pipeline_command(config.pipeline_command.as_deref())?,
        PipelineBackend::ComfyUi => println!(
            "worker-selfcheck: ComfyUI expected at {}",
            config.comfyui_url
        ),
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;

    // The worker writes its temporary images and videos here
    let scratch_file = tempfile::NamedTempFile::new_in(path)
        .map_err(|e| anyhow::anyhow!("work dir {} is not writable: {}", path.display(), e))?;
    scratch_file.close()?;
    Ok(())
}

async fn ensure_ffmpeg() -> anyhow::Result<()> {
    let ffmpeg = i2v_media::check_ffmpeg()?;
    let output = Command::new(&ffmpeg)
        .arg("-version")
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "ffmpeg -version failed: {:?}",
            output.status
        ));
    }
    Ok(())
}

fn ensure_pipeline_command(command_line: Option<&str>) -> anyhow::Result<()> {
    let program = command_line
        .and_then(|c| c.split_whitespace().next())
        .ok_or_else(|| anyhow::anyhow!("missing required env var PIPELINE_COMMAND"))?;
    which::which(program)
        .map_err(|e| anyhow::anyhow!("pipeline command {} not found: {}", program, e))?;
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).map(|v| v.trim().is_empty()).unwrap_or(true) {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
