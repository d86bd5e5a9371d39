use anyhow::{bail, Context as _, Result};
use std::path::{Path, PathBuf};
use termpad_core::ai::{SuggestionCoordinator, SuggestionKind, SuggestionRequest};
use termpad_core::discovery::{self, DiscoveredPlugin};
use termpad_core::keybind::KeybindingManager;
use termpad_core::plugin::PluginManifest;
use termpad_core::settings;
use termpad_core::store::JsonFileStore;
use termpad_core::validator::IssueLevel;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(cmd) = args.next() else {
        print_help();
        return Ok(());
    };

    match cmd.as_str() {
        "validate" => cmd_validate(args.collect()),
        "keymap" => cmd_keymap(args.collect()),
        "suggest" => cmd_suggest(args.collect()),
        "help" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => {
            print_help();
            bail!("unknown xtask command: {other}");
        }
    }
}

fn print_help() {
    eprintln!(
        r#"xtask (termpad)

Commands:
  validate   Validate every plugin.json under a plugins directory
  keymap     Show resolved plugin key bindings, overrides and conflicts
  suggest    Ask the configured AI route for a suggestion at a file position

Examples:
  cargo run -p xtask -- validate --path ./plugins
  cargo run -p xtask -- validate --path ./plugins --json
  cargo run -p xtask -- keymap --path ./plugins --config ~/.config/termpad --project .
  cargo run -p xtask -- suggest --file src/main.rs --line 10 --col 4 --config ~/.config/termpad

Set RUST_LOG=debug for host logs.
"#
    );
}

struct ValidateArgs {
    path: PathBuf,
    json: bool,
}

fn parse_validate_args(args: Vec<String>) -> Result<ValidateArgs> {
    let mut path: Option<PathBuf> = None;
    let mut json = false;
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--path" => path = Some(PathBuf::from(it.next().context("--path requires a value")?)),
            "--json" => json = true,
            other => bail!("unknown validate arg: {other}"),
        }
    }
    Ok(ValidateArgs {
        path: path.unwrap_or_else(|| PathBuf::from("plugins")),
        json,
    })
}

fn cmd_validate(args: Vec<String>) -> Result<()> {
    let args = parse_validate_args(args)?;
    let found = discovery::validate_dir(&args.path)?;

    if args.json {
        let reports: Vec<_> = found
            .iter()
            .map(|p| {
                serde_json::json!({
                    "path": p.path.display().to_string(),
                    "report": p.report,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&found);
    }

    let invalid = found.iter().filter(|p| !p.report.valid).count();
    if invalid > 0 {
        bail!("{invalid} of {} plugin(s) failed validation", found.len());
    }
    Ok(())
}

fn print_reports(found: &[DiscoveredPlugin]) {
    println!("validate:");
    println!("  plugins: {}", found.len());
    for plugin in found {
        let id = plugin.report.plugin_id.as_deref().unwrap_or("<no id>");
        let verdict = if plugin.report.valid { "ok" } else { "REJECTED" };
        println!("  {id} [{verdict}] {}", plugin.path.display());
        for issue in &plugin.report.issues {
            let marker = match issue.level {
                IssueLevel::Error => "x",
                IssueLevel::Warning => "!",
            };
            println!("    {marker} {issue}");
        }
    }
}

struct KeymapArgs {
    path: PathBuf,
    config: PathBuf,
    project: Option<PathBuf>,
}

fn parse_keymap_args(args: Vec<String>) -> Result<KeymapArgs> {
    let mut path: Option<PathBuf> = None;
    let mut config: Option<PathBuf> = None;
    let mut project: Option<PathBuf> = None;
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--path" => path = Some(PathBuf::from(it.next().context("--path requires a value")?)),
            "--config" => {
                config = Some(PathBuf::from(it.next().context("--config requires a value")?))
            }
            "--project" => {
                project = Some(PathBuf::from(it.next().context("--project requires a value")?))
            }
            other => bail!("unknown keymap arg: {other}"),
        }
    }
    Ok(KeymapArgs {
        path: path.unwrap_or_else(|| PathBuf::from("plugins")),
        config: config.unwrap_or_else(|| PathBuf::from(".termpad")),
        project,
    })
}

fn cmd_keymap(args: Vec<String>) -> Result<()> {
    let args = parse_keymap_args(args)?;
    let settings = settings::load_effective_settings(&args.config, args.project.as_deref())?;
    let store_path = settings.keybinding_store_path(&args.config);
    let mut manager = KeybindingManager::with_store(Box::new(JsonFileStore::open(&store_path)));

    let manifests = discovery::load_manifests(&args.path)?;
    let reports = termpad_core::validator::validate_batch(
        manifests.iter().map(|m| (&m.manifest, None)),
    );
    for (discovered, report) in manifests.iter().zip(reports) {
        if !report.valid {
            tracing::warn!(path = %discovered.path.display(), "skipping invalid manifest");
            continue;
        }
        let manifest = PluginManifest::from_value(&discovered.manifest)
            .with_context(|| format!("read manifest: {}", discovered.path.display()))?;
        let enabled = settings
            .plugins
            .enabled
            .get(&manifest.id)
            .copied()
            .unwrap_or(manifest.default_enabled);
        if enabled {
            manager.register_plugin_bindings(&manifest.id, manifest.keybindings);
        }
    }

    println!("keymap:");
    println!("  overrides: {}", store_path.display());
    for entry in manager.get_all_entries() {
        let keys = entry.effective_keys.as_deref().unwrap_or("<disabled>");
        let mut flags = Vec::new();
        if entry.active {
            flags.push("active");
        }
        if entry.has_conflict {
            flags.push("conflict");
        }
        if entry.is_user_override {
            flags.push("override");
        }
        println!(
            "  {:<24} {:<18} {:<8} {} -> {} [{}]",
            entry.binding.id,
            keys,
            entry.binding.context.as_tag(),
            entry.plugin_id,
            entry.binding.command,
            flags.join(",")
        );
    }

    let conflicts = manager.get_conflicts();
    println!("  conflicts: {}", conflicts.len());
    for conflict in conflicts {
        let members: Vec<_> = conflict
            .entries
            .iter()
            .map(|e| format!("{}/{}", e.plugin_id, e.binding.id))
            .collect();
        println!(
            "    {} ({}): {}",
            conflict.keys,
            conflict.context.as_tag(),
            members.join(", ")
        );
    }
    Ok(())
}

struct SuggestArgs {
    file: PathBuf,
    line: u32,
    col: u32,
    config: PathBuf,
    project: Option<PathBuf>,
    stream: bool,
}

fn parse_suggest_args(args: Vec<String>) -> Result<SuggestArgs> {
    let mut file: Option<PathBuf> = None;
    let mut line = 0u32;
    let mut col = 0u32;
    let mut config: Option<PathBuf> = None;
    let mut project: Option<PathBuf> = None;
    let mut stream = false;
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--file" => file = Some(PathBuf::from(it.next().context("--file requires a value")?)),
            "--line" => {
                line = it
                    .next()
                    .context("--line requires a value")?
                    .parse()
                    .context("invalid --line")?
            }
            "--col" => {
                col = it
                    .next()
                    .context("--col requires a value")?
                    .parse()
                    .context("invalid --col")?
            }
            "--config" => {
                config = Some(PathBuf::from(it.next().context("--config requires a value")?))
            }
            "--project" => {
                project = Some(PathBuf::from(it.next().context("--project requires a value")?))
            }
            "--stream" => stream = true,
            other => bail!("unknown suggest arg: {other}"),
        }
    }
    Ok(SuggestArgs {
        file: file.context("--file is required")?,
        line,
        col,
        config: config.unwrap_or_else(|| PathBuf::from(".termpad")),
        project,
        stream,
    })
}

fn cmd_suggest(args: Vec<String>) -> Result<()> {
    let args = parse_suggest_args(args)?;
    let settings = settings::load_effective_settings(&args.config, args.project.as_deref())?;
    let coordinator = SuggestionCoordinator::new();
    coordinator.apply_settings(&settings);
    if !coordinator.is_active() {
        bail!("no ai route configured (set `ai.url` in settings.json)");
    }

    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("read file: {}", args.file.display()))?;
    let request = build_request(&args.file, content, args.line, args.col);

    if args.stream {
        let outcome = coordinator.stream_suggestion(
            &request,
            |chunk| print!("{chunk}"),
            || println!(),
        );
        tracing::debug!(?outcome, "stream finished");
        return Ok(());
    }
    match coordinator.get_suggestion(&request) {
        Some(text) => println!("{text}"),
        None => eprintln!("no suggestion"),
    }
    Ok(())
}

fn build_request(path: &Path, content: String, line: u32, col: u32) -> SuggestionRequest {
    let line_text = content.lines().nth(line as usize).unwrap_or_default().to_string();
    let line_start: usize = content
        .split_inclusive('\n')
        .take(line as usize)
        .map(|l| l.chars().count())
        .sum();
    let col = (col as usize).min(line_text.chars().count());
    let offset = (line_start + col).min(content.chars().count());
    let prefix: String = content.chars().take(offset).collect();
    let suffix: String = content.chars().skip(offset).collect();

    SuggestionRequest {
        line,
        col: col as u32,
        line_text,
        language: path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("plaintext")
            .to_string(),
        file_name: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        prefix,
        suffix,
        kind: SuggestionKind::Completion,
        content,
    }
}
