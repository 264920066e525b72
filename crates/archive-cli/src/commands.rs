use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use anyhow::{bail, Context};
use archive_blob::{BlobStore, FsBlobStore, IMMUTABLE_CACHE_CONTROL};
use archive_tree::{DeleteMode, ResourceTree, SqliteResourceStore};
use archive_types::{
    BlobId, CancelToken, NewResource, Resource, ResourceId, ResourceKind, ResourcePath,
    ResourceUpdate,
};
use colored::Colorize;
use serde_json::json;
use tracing::info;

use crate::cli::*;
use crate::config::ArchiveConfig;
use crate::import;

/// Everything a command needs: configuration plus both stores.
struct Archive {
    config: ArchiveConfig,
    tree: ResourceTree<SqliteResourceStore>,
    blobs: FsBlobStore,
    format: OutputFormat,
}

impl Archive {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let config = ArchiveConfig::load(cli.config.as_deref(), cli.data.as_deref())?;
        let db = config.database_path();
        let store = SqliteResourceStore::open(&db, &config.store_config()?)
            .with_context(|| format!("opening {}", db.display()))?;
        Ok(Self {
            blobs: FsBlobStore::new(config.blob_path()),
            tree: ResourceTree::new(store),
            config,
            format: cli.format,
        })
    }

    fn cancel(&self) -> CancelToken {
        self.config.cancel_token()
    }

    fn resolve_existing(&self, raw: &str, cancel: &CancelToken) -> anyhow::Result<ResourceId> {
        let path = ResourcePath::parse(raw);
        match self.tree.resolve(&path, cancel)? {
            Some(id) => Ok(id),
            None => bail!("'{raw}' is the root, not a resource"),
        }
    }

    fn store_file(&self, file: &Path) -> anyhow::Result<BlobId> {
        let mut reader =
            File::open(file).with_context(|| format!("opening {}", file.display()))?;
        let id = self.blobs.store(&mut reader, &self.cancel())?;
        info!(blob = %id.short_hex(), file = %file.display(), "stored blob");
        Ok(id)
    }

    fn emit(&self, value: serde_json::Value, text: impl FnOnce()) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&value)?),
            OutputFormat::Text => text(),
        }
        Ok(())
    }
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    if let Command::Init = cli.command {
        return cmd_init(&cli);
    }
    let mut archive = Archive::open(&cli)?;
    match cli.command {
        Command::Init => Ok(()),
        Command::Add(args) => cmd_add(&mut archive, args),
        Command::Edit(args) => cmd_edit(&mut archive, args),
        Command::Attach(args) => cmd_attach(&mut archive, args),
        Command::Ls(args) => cmd_ls(&archive, args),
        Command::Show(args) => cmd_show(&archive, args),
        Command::Resolve(args) => cmd_resolve(&archive, args),
        Command::Path(args) => cmd_path(&archive, args),
        Command::Tree(args) => cmd_tree(&archive, args),
        Command::Mv(args) => cmd_mv(&mut archive, args),
        Command::Reparent(args) => cmd_reparent(&mut archive, args),
        Command::Rm(args) => cmd_rm(&mut archive, args),
        Command::Search(args) => cmd_search(&archive, args),
        Command::Blob(args) => cmd_blob(&archive, args),
        Command::Import(args) => cmd_import(&mut archive, args),
    }
}

fn kind_marker(resource: &Resource) -> colored::ColoredString {
    match resource.kind {
        ResourceKind::Container => "▸".blue().bold(),
        ResourceKind::Item => "·".dimmed(),
    }
}

fn print_row(resource: &Resource, path: Option<&ResourcePath>) {
    let label = match path {
        Some(p) => p.to_string(),
        None => resource.name.clone(),
    };
    let mut line = format!(
        "{} {} {}",
        kind_marker(resource),
        format!("#{}", resource.id).yellow(),
        label.bold()
    );
    if !resource.color.is_empty() {
        line.push_str(&format!(" [{}]", resource.color.cyan()));
    }
    if resource.image.is_some() {
        line.push_str(&format!(" {}", "(image)".dimmed()));
    }
    println!("{line}");
}

fn cmd_init(cli: &Cli) -> anyhow::Result<()> {
    let config = ArchiveConfig::load(cli.config.as_deref(), cli.data.as_deref())?;
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    fs::create_dir_all(config.blob_path())?;
    let config_path = config.config_path();
    let wrote_config = !config_path.exists();
    if wrote_config {
        fs::write(&config_path, config.to_toml()?)
            .with_context(|| format!("writing {}", config_path.display()))?;
    }
    SqliteResourceStore::open(config.database_path(), &config.store_config()?)?;
    println!(
        "{} Initialized archive in {}",
        "✓".green().bold(),
        config.data_dir.display().to_string().bold()
    );
    println!("  Database: {}", config.database_path().display());
    println!("  Blobs:    {}", config.blob_path().display());
    if wrote_config {
        println!("  Config:   {}", config_path.display());
    }
    Ok(())
}

fn cmd_add(archive: &mut Archive, args: AddArgs) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let path = ResourcePath::parse(&args.path);
    let Some(name) = path.name() else {
        bail!("a resource path needs at least one name");
    };
    let kind: ResourceKind = args.kind.parse()?;
    let image = args.image.as_deref().map(|f| archive.store_file(f)).transpose()?;
    let new = NewResource::new(name, kind)
        .with_color(args.color)
        .with_comments(args.comments)
        .with_image(image);
    let id = archive.tree.create_at(&path.parent(), &new, &cancel)?;
    archive.emit(json!({ "id": id, "path": path }), || {
        println!("{} Created {} {}", "✓".green(), format!("#{id}").yellow(), path.to_string().bold());
    })
}

fn cmd_edit(archive: &mut Archive, args: EditArgs) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let id = archive.resolve_existing(&args.path, &cancel)?;
    let current = archive.tree.get(id, &cancel)?;
    let mut update = ResourceUpdate::from_resource(&current);
    if let Some(name) = args.name {
        update.name = name;
    }
    if let Some(kind) = args.kind {
        update.kind = kind.parse()?;
    }
    if let Some(color) = args.color {
        update.color = color;
    }
    if let Some(comments) = args.comments {
        update.comments = comments;
    }
    let updated = archive.tree.update(&update, &cancel)?;
    if updated.is_empty() {
        bail!("resource #{id} disappeared before it could be updated");
    }
    let resource = archive.tree.get(id, &cancel)?;
    archive.emit(json!(resource), || {
        println!("{} Updated", "✓".green());
        print_row(&resource, None);
    })
}

fn cmd_attach(archive: &mut Archive, args: AttachArgs) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let id = archive.resolve_existing(&args.path, &cancel)?;
    let image = match (&args.file, args.clear) {
        (Some(file), false) => Some(archive.store_file(file)?),
        (None, true) => None,
        _ => bail!("give an image file or --clear"),
    };
    let updated = archive.tree.set_image(id, image, &cancel)?;
    if updated.is_empty() {
        bail!("resource #{id} disappeared before the image was attached");
    }
    archive.emit(json!({ "id": id, "image": image }), || match image {
        Some(blob) => println!("{} Attached {}", "✓".green(), blob.short_hex().cyan()),
        None => println!("{} Cleared image", "✓".green()),
    })
}

fn cmd_ls(archive: &Archive, args: LsArgs) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let parent = match &args.path {
        Some(raw) => archive.tree.resolve(&ResourcePath::parse(raw), &cancel)?,
        None => None,
    };
    let children = archive.tree.children(parent, &cancel)?;
    archive.emit(json!(children), || {
        if children.is_empty() {
            println!("{}", "(empty)".dimmed());
        }
        for child in &children {
            print_row(child, None);
        }
    })
}

fn cmd_show(archive: &Archive, args: PathArg) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let id = archive.resolve_existing(&args.path, &cancel)?;
    let resource = archive.tree.get(id, &cancel)?;
    let path = archive.tree.get_path(id, &cancel)?;
    archive.emit(json!({ "resource": resource, "path": path }), || {
        println!("{}  {}", format!("#{}", resource.id).yellow().bold(), path.to_string().bold());
        println!("  Type:     {}", resource.kind);
        if !resource.color.is_empty() {
            println!("  Color:    {}", resource.color.cyan());
        }
        if !resource.comments.is_empty() {
            println!("  Comments: {}", resource.comments);
        }
        if let Some(image) = resource.image {
            println!("  Image:    {}", image.to_hex().dimmed());
        }
    })
}

fn cmd_resolve(archive: &Archive, args: PathArg) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let id = archive.tree.resolve(&ResourcePath::parse(&args.path), &cancel)?;
    archive.emit(json!({ "id": id }), || match id {
        Some(id) => println!("{id}"),
        None => println!("{}", "(root)".dimmed()),
    })
}

fn cmd_path(archive: &Archive, args: IdArg) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let id: ResourceId = args.id.parse()?;
    let path = archive.tree.get_path(id, &cancel)?;
    archive.emit(json!({ "id": id, "path": path }), || println!("{path}"))
}

fn cmd_tree(archive: &Archive, args: TreeArgs) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let paths = if args.containers {
        archive.tree.containers(&cancel)?
    } else {
        let anchor = match &args.path {
            Some(raw) => archive.tree.resolve(&ResourcePath::parse(raw), &cancel)?,
            None => None,
        };
        archive.tree.subtree(anchor, &cancel)?
    };
    archive.emit(json!(paths), || {
        for path in &paths {
            let indent = "  ".repeat(path.depth().saturating_sub(1));
            println!("{indent}{}", path.name().unwrap_or_default());
        }
    })
}

fn cmd_mv(archive: &mut Archive, args: MvArgs) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let sources: Vec<ResourcePath> = args.sources.iter().map(|s| ResourcePath::parse(s)).collect();
    let destination = ResourcePath::parse(&args.destination);
    let moved = archive.tree.move_paths(&sources, &destination, &cancel)?;
    archive.emit(json!({ "moved": moved, "destination": destination }), || {
        println!(
            "{} Moved {} resource(s) to {}",
            "✓".green(),
            moved.len().to_string().bold(),
            destination.to_string().bold()
        );
    })
}

fn cmd_reparent(archive: &mut Archive, args: ReparentArgs) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let from = archive.tree.resolve(&ResourcePath::parse(&args.from), &cancel)?;
    let to = archive.tree.resolve(&ResourcePath::parse(&args.to), &cancel)?;
    let changed = archive.tree.change_parent(from, to, &cancel)?;
    archive.emit(json!({ "changed": changed }), || {
        println!("{} Reparented {} resource(s)", "✓".green(), changed.to_string().bold());
    })
}

fn cmd_rm(archive: &mut Archive, args: RmArgs) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let path = ResourcePath::parse(&args.path);
    let mode = if args.deep { DeleteMode::Deep } else { DeleteMode::Shallow };
    let removed = archive.tree.delete_at(&path, mode, &cancel)?;
    archive.emit(json!({ "removed": removed }), || {
        println!(
            "{} Deleted {} ({} resource(s) removed)",
            "✓".green(),
            path.to_string().bold(),
            removed
        );
    })
}

fn cmd_search(archive: &Archive, args: SearchArgs) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let query = args.query.join(" ");
    let hits = archive.tree.search(&query, &cancel)?;
    let mut rows = Vec::with_capacity(hits.len());
    for hit in hits {
        let path = archive.tree.get_path(hit.id, &cancel)?;
        rows.push((hit, path));
    }
    let value = json!(rows
        .iter()
        .map(|(r, p)| json!({ "resource": r, "path": p }))
        .collect::<Vec<_>>());
    archive.emit(value, || {
        if rows.is_empty() {
            println!("{}", "No matches.".dimmed());
        }
        for (resource, path) in &rows {
            print_row(resource, Some(path));
        }
    })
}

fn cmd_blob(archive: &Archive, args: BlobArgs) -> anyhow::Result<()> {
    match args.action {
        BlobAction::Put { file } => {
            let id = archive.store_file(&file)?;
            archive.emit(json!({ "id": id }), || println!("{id}"))
        }
        BlobAction::Get { id, output } => {
            let id: BlobId = id.parse()?;
            let mut reader = archive.blobs.open(&id)?;
            match output {
                Some(path) => {
                    let mut file = File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    io::copy(&mut reader, &mut file)?;
                }
                None => {
                    let mut out = io::stdout().lock();
                    io::copy(&mut reader, &mut out)?;
                    out.flush()?;
                }
            }
            Ok(())
        }
        BlobAction::Stat { id } => {
            let id: BlobId = id.parse()?;
            let size = archive.blobs.size(&id)?;
            let intact = archive.blobs.verify(&id).is_ok();
            archive.emit(
                json!({
                    "id": id,
                    "size": size,
                    "intact": intact,
                    "cache_control": IMMUTABLE_CACHE_CONTROL,
                }),
                || {
                    println!("{}", id.to_string().yellow().bold());
                    println!("  Size:          {size} bytes");
                    println!(
                        "  Integrity:     {}",
                        if intact { "ok".green() } else { "MISMATCH".red().bold() }
                    );
                    println!("  Cache-Control: {IMMUTABLE_CACHE_CONTROL}");
                },
            )
        }
    }
}

fn cmd_import(archive: &mut Archive, args: ImportArgs) -> anyhow::Result<()> {
    let cancel = archive.cancel();
    let under = ResourcePath::parse(&args.under);
    let ids = import::import_dir(&mut archive.tree, &args.dir, &under, &cancel)?;
    archive.emit(json!({ "created": ids.len(), "under": under }), || {
        println!(
            "{} Imported {} resource(s) from {} under {}",
            "✓".green().bold(),
            ids.len().to_string().bold(),
            args.dir.display(),
            under.to_string().bold()
        );
    })
}
