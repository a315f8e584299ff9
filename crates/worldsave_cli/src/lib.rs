use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use worldsave::{
    read_world_file, sha256_hex, write_world_file, ContentManifest, ContentRegistry, ContentTable,
    EntityKinds, IdentityTable, Layer, LoadReport, SectionTag, World, WorldFile,
};

pub const CONTENT_ENV_VAR: &str = "WORLDSAVE_CONTENT";

#[derive(Debug, Clone, Default)]
pub struct CommonOptions {
    pub content: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum CommandKind {
    Inspect { world: PathBuf },
    Resave { world: PathBuf, output: Option<PathBuf> },
    ListUnloaded { world: PathBuf },
}

pub fn run<W: Write>(kind: CommandKind, opts: &CommonOptions, stdout: &mut W) -> Result<(), String> {
    let registry = load_registry(opts.content.as_deref())?;
    match kind {
        CommandKind::Inspect { world } => inspect(&world, &registry, stdout),
        CommandKind::Resave { world, output } => {
            let (loaded, report) = load_world(&world, &registry)?;
            let target = output.unwrap_or(world);
            let file = loaded
                .save(&registry)
                .map_err(|error| format!("save '{}': {error}", target.display()))?;
            write_world_file(&target, &file)
                .map_err(|error| format!("write '{}': {error}", target.display()))?;
            write_report(stdout, &report)?;
            emit(stdout, &format!("wrote {}", target.display()))
        }
        CommandKind::ListUnloaded { world } => {
            let (loaded, _) = load_world(&world, &registry)?;
            list_unloaded(&loaded, stdout)
        }
    }
}

pub fn load_registry(path: Option<&Path>) -> Result<ContentTable, String> {
    let path = path.ok_or_else(|| {
        format!("no content manifest given (pass --content or set {CONTENT_ENV_VAR})")
    })?;
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("read manifest '{}': {error}", path.display()))?;
    let manifest = parse_manifest_json(&raw)?;
    ContentTable::from_manifest(&manifest)
        .map_err(|error| format!("manifest '{}': {error}", path.display()))
}

pub fn parse_manifest_json(raw: &str) -> Result<ContentManifest, String> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    match serde_path_to_error::deserialize::<_, ContentManifest>(&mut deserializer) {
        Ok(manifest) => Ok(manifest),
        Err(error) => {
            let path = error.path().to_string();
            let source = error.into_inner();
            if path.is_empty() || path == "." {
                Err(format!("parse manifest json: {source}"))
            } else {
                Err(format!("parse manifest json at {path}: {source}"))
            }
        }
    }
}

fn read_file(path: &Path) -> Result<WorldFile, String> {
    read_world_file(path).map_err(|error| format!("read '{}': {error}", path.display()))
}

fn load_world(path: &Path, registry: &ContentTable) -> Result<(World, LoadReport), String> {
    let file = read_file(path)?;
    World::load(&file, registry, &EntityKinds::new())
        .map_err(|error| format!("load '{}': {error}", path.display()))
}

fn inspect<W: Write>(path: &Path, registry: &ContentTable, stdout: &mut W) -> Result<(), String> {
    let raw = fs::read(path).map_err(|error| format!("read '{}': {error}", path.display()))?;
    let file = read_file(path)?;
    emit(stdout, &format!("file: {} ({} bytes)", path.display(), raw.len()))?;
    emit(stdout, &format!("sha256: {}", sha256_hex(&raw)))?;
    emit(stdout, &format!("size: {}x{}", file.width, file.height))?;
    for (tag, bytes) in file.sections() {
        emit(stdout, &format!("section {tag}: {} bytes", bytes.len()))?;
    }

    if let Some(bytes) = file.section(SectionTag::IdentityTable) {
        let table = IdentityTable::decode(bytes).map_err(|error| format!("identity table: {error}"))?;
        for layer in [Layer::Tile, Layer::Wall] {
            for entry in table.entries(layer) {
                let status = match registry.find(layer, &entry.key.origin, &entry.key.name) {
                    Some(kind) => format!("-> {kind}"),
                    None => "missing".to_string(),
                };
                emit(
                    stdout,
                    &format!("{layer} {} {} {status}", entry.save_id, entry.key),
                )?;
            }
        }
    }

    let (_, report) = World::load(&file, registry, &EntityKinds::new())
        .map_err(|error| format!("load '{}': {error}", path.display()))?;
    write_report(stdout, &report)
}

fn write_report<W: Write>(stdout: &mut W, report: &LoadReport) -> Result<(), String> {
    let status = if report.is_clean() { "clean" } else { "degraded" };
    emit(stdout, &format!("load: {status}"))?;
    emit(
        stdout,
        &format!(
            "unresolved: {} tile kinds, {} wall kinds",
            report.unresolved_tiles, report.unresolved_walls
        ),
    )?;
    emit(
        stdout,
        &format!(
            "unloaded cells: {} restored, {} promoted",
            report.unloaded.restored.restored_count(),
            report.unloaded.promoted
        ),
    )?;
    emit(
        stdout,
        &format!(
            "entities: {} loaded, {} unloaded, {} dropped",
            report.entities.loaded, report.entities.unloaded, report.entities.dropped
        ),
    )?;
    for error in &report.entities.errors {
        emit(stdout, &format!("entity error: {error}"))?;
    }
    Ok(())
}

fn list_unloaded<W: Write>(world: &World, stdout: &mut W) -> Result<(), String> {
    for layer in [Layer::Tile, Layer::Wall] {
        for (slot, info) in world.unloaded.infos(layer).iter().enumerate() {
            if let Some(info) = info {
                emit(stdout, &format!("{layer} slot {slot}: {info}"))?;
            }
        }
    }
    let wall_cells = world.unloaded.wall_coords().count();
    emit(stdout, &format!("unloaded wall cells: {wall_cells}"))
}

fn emit<W: Write>(stdout: &mut W, line: &str) -> Result<(), String> {
    writeln!(stdout, "{line}").map_err(|error| format!("failed writing stdout: {error}"))
}
