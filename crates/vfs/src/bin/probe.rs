//! fsbridge-probe: exercise the bridge against a real directory
//!
//! Mounts a directory (and optionally a remote repository) behind the patched
//! driver, then stats and lists each path given on the command line exactly as
//! the runtime would.

#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(not(target_arch = "wasm32"))]
fn print_help() {
    println!("fsbridge-probe - inspect paths through the storage bridge");
    println!();
    println!("USAGE:");
    println!("    fsbridge-probe [OPTIONS] <DIR> [PATH]...");
    println!();
    println!("ARGS:");
    println!("    DIR                 Directory mounted at /files");
    println!("    PATH                Runtime paths to stat and list (default: /files)");
    println!();
    println!("OPTIONS:");
    println!("    -r, --repo SPEC     Mount owner/repo[@branch] under /github");
    println!("    --read PATH         Print the first bytes of a file");
    println!("    -h, --help          Print help information");
    println!("    -v, --version       Print version");
    println!();
    println!("CONFIG:");
    println!("    ~/.config/fsbridge/config.toml");
}

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging (tracing)
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut dir: Option<String> = None;
    let mut repo: Option<String> = None;
    let mut reads: Vec<String> = Vec::new();
    let mut paths: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("fsbridge-probe {VERSION}");
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--repo" | "-r" if i + 1 < args.len() => {
                repo = Some(args[i + 1].clone());
                i += 2;
            }
            "--read" if i + 1 < args.len() => {
                reads.push(args[i + 1].clone());
                i += 2;
            }
            arg if dir.is_none() && !arg.starts_with('-') => {
                dir = Some(arg.to_string());
                i += 1;
            }
            arg => {
                paths.push(arg.to_string());
                i += 1;
            }
        }
    }

    let Some(dir) = dir else {
        print_help();
        anyhow::bail!("missing DIR argument");
    };
    if paths.is_empty() {
        paths.push("/files".to_string());
    }

    tokio::task::LocalSet::new()
        .run_until(probe::run(&dir, repo.as_deref(), &paths, &reads))
        .await
}

#[cfg(not(target_arch = "wasm32"))]
mod probe {
    use std::rc::Rc;

    use anyhow::Context;
    use fsbridge_vfs::{
        BlockingBridge, BridgeConfig, Continuation, DetachedContext, FilesystemBridgeContext,
        NullDriver, OpenRequest, PatchedDriver, StdDirectory, StorageDriver, TokioSpawner,
    };

    const PREVIEW_BYTES: u64 = 256;

    pub async fn run(
        dir: &str,
        repo: Option<&str>,
        paths: &[String],
        reads: &[String],
    ) -> anyhow::Result<()> {
        let config = BridgeConfig::load();
        let context = Rc::new(FilesystemBridgeContext::with_http(config)?);

        let root = StdDirectory::open(dir).with_context(|| format!("cannot mount {dir}"))?;
        context.native().mount_slot().mount(root);
        if let Some(spec) = repo {
            let mount = context
                .remote()
                .mount_spec(spec)
                .await
                .with_context(|| format!("cannot mount repository {spec}"))?;
            tracing::info!(repo = %mount.key(), branch = %mount.branch, "repository ready");
        }

        let bridge = BlockingBridge::new(Rc::new(DetachedContext), Rc::new(TokioSpawner));
        let driver = PatchedDriver::new(Rc::new(NullDriver), context.clone(), bridge);

        for path in paths {
            let (reply, rx) = Continuation::channel("stat");
            driver.stat_async(path, reply);
            let stat = rx.await?;
            if !stat.exists() {
                println!("{path}: not found");
                continue;
            }
            println!(
                "{path}: inode={} mode={:o} size={} mtime={}",
                stat.inode_id, stat.perm_type, stat.file_length, stat.last_modified
            );
            if stat.is_dir() {
                let (reply, rx) = Continuation::channel("list");
                driver.list_async(path, reply);
                for name in rx.await? {
                    println!("  {name}");
                }
            }
        }

        for path in reads {
            let (reply, rx) = Continuation::channel("open");
            driver.make_file_data(OpenRequest::new(path.as_str(), "r"), reply);
            let Some(record) = rx.await? else {
                println!("{path}: cannot open");
                continue;
            };
            let (reply, rx) = Continuation::channel("read");
            driver.read_async(&record, 0, PREVIEW_BYTES, reply);
            let data = rx.await?;
            println!("{path}: {} of {} bytes", data.len(), record.byte_length());
            println!("{}", String::from_utf8_lossy(&data));
            let (reply, rx) = Continuation::channel("close");
            driver.close(&record, reply);
            rx.await?;
        }

        let status = serde_json::to_string_pretty(&context.status())?;
        println!("{status}");
        Ok(())
    }
}
