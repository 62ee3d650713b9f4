use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

use session_report_core::{
    backup_report, compile_schema, load_cache, resolve_columns, CacheIndex, CollectStore,
    GeoCache, MemoryStore, ReportPaths, ReportWriter, RunContext,
};

use crate::cli::Cli;
use crate::config::build_options;
use crate::geo::{IpApiClient, DEFAULT_ENDPOINT};
use crate::logging;
use crate::upload;

pub fn run(cli: Cli) -> Result<()> {
    let store = MemoryStore::load(Path::new(&cli.project))
        .with_context(|| format!("failed to load project snapshot {}", cli.project))?;
    let options = build_options(&cli)?;
    let columns = resolve_columns(&options, store.input_prompts())?;
    logging::info(format!(
        "project {}: {} sessions, {} session columns, {} stat columns",
        store.project().name,
        store.sessions().len(),
        columns.session.len(),
        columns.stat.len(),
    ));

    logging::verbose(format!(
        "session columns: {}",
        columns.session.names().join(", ")
    ));

    let report_name = cli
        .report_name
        .clone()
        .unwrap_or_else(|| default_report_name(&store));
    let paths = ReportPaths::from_stem(PathBuf::from(&cli.output_dir).join(report_name));

    if cli.from_scratch {
        logging::stage("cache", "backing up existing report and recomputing from scratch");
        backup_report(&paths)?;
    }
    let cache = if cli.from_scratch {
        CacheIndex::empty()
    } else {
        load_cache(&paths, &columns)?
    };
    logging::stage("cache", format!("{} cached session row(s) available", cache.len()));

    let validator = match &options.schema {
        Some(schema) => Some(compile_schema(schema)?),
        None => None,
    };
    let geo = GeoCache::new(Box::new(IpApiClient::new(DEFAULT_ENDPOINT)?));
    let ctx = RunContext {
        options: &options,
        columns: &columns,
        cache: &cache,
        geo: &geo,
        validator: validator.as_ref(),
        today: Local::now().date_naive(),
    };

    let writer = ReportWriter::create(&paths, &columns)?;
    let summary = session_report_core::run(&store, &ctx, writer, cli.workers)?;
    logging::info(format!(
        "wrote {} session row(s) ({} cache hit(s), {} rejection row(s)) to {}",
        summary.sessions,
        summary.cache_hits,
        summary.rejections,
        paths.sessions.display(),
    ));

    if cli.no_upload {
        return Ok(());
    }
    let dirname = format!("/Data Collection/{}", store.project().name);
    for path in [&paths.sessions, &paths.stats] {
        logging::stage(
            "upload",
            format!("uploading {} to {}{}", path.display(), cli.remote, dirname),
        );
        upload::rclone_copy(path, &cli.remote, &dirname)?;
    }
    Ok(())
}

fn default_report_name(store: &MemoryStore) -> String {
    let project = store.project();
    format!(
        "{}_{}_{}_{}_collection_report",
        project.number, project.name, project.description, project.lang_code
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_snapshot(dir: &Path) -> PathBuf {
        let path = dir.join("project.json");
        let snapshot = json!({
            "project": {"number": 9716, "name": "amr", "description": "collect", "lang_code": "en-AU"},
            "sessions": [{
                "id": 1,
                "name": "sess_0001",
                "pin": "pin-1",
                "completed": true,
                "created": "2024-05-01T10:00:00",
                "duration": 30.5,
                "files": []
            }]
        });
        write!(std::fs::File::create(&path).unwrap(), "{snapshot}").unwrap();
        path
    }

    #[test]
    fn default_report_name_follows_the_project_fields() {
        let dir = tempdir().unwrap();
        let path = write_snapshot(dir.path());
        let store = MemoryStore::load(&path).unwrap();
        assert_eq!(
            default_report_name(&store),
            "9716_amr_collect_en-AU_collection_report"
        );
    }

    #[test]
    fn run_writes_a_report_without_uploading() {
        let dir = tempdir().unwrap();
        let snapshot = write_snapshot(dir.path());
        let cli = Cli::parse_from([
            "sessionreport",
            snapshot.to_str().unwrap(),
            "-n",
            "-o",
            dir.path().to_str().unwrap(),
            "-r",
            "smoke",
        ]);
        run(cli).unwrap();
        let sessions = std::fs::read_to_string(dir.path().join("smoke_sessions.csv")).unwrap();
        assert!(sessions.lines().next().unwrap().starts_with("Directory Name,"));
        assert!(sessions.contains("sess_0001"));
        assert!(dir.path().join("smoke_stats.csv").exists());
    }
}
