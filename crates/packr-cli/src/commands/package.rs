use packr_build::collapse::CollapseReport;
use packr_build::trace::CallSite;
use packr_build::{Mode, PackageOutcome, Packager};
use packr_core::PackrConfig;
use std::collections::BTreeMap;
use std::path::Path;

pub async fn package(dir: &Path, unit: Option<&str>, report: bool) -> anyhow::Result<()> {
    let cwd = std::path::absolute(dir)?;
    let config = PackrConfig::load(&cwd)?;

    let mut units = config.units(&cwd)?;
    if let Some(name) = unit {
        units.retain(|u| u.bundle_name == name);
        if units.is_empty() {
            anyhow::bail!("no packaging unit named '{name}'");
        }
    }
    if report {
        for u in &mut units {
            u.report = true;
        }
    }

    let results = Packager::new().package_all(units).await;
    let total = results.len();
    let mut failed = 0;

    for (name, result) in results {
        match result {
            Ok(outcome) => {
                warn_collapsed(&name, &outcome.collapsed);
                warn_misses(&name, &outcome.trace.misses);
                print_outcome(&name, &outcome, report)?;
            }
            Err(e) => {
                failed += 1;
                eprintln!("Failed to package {name}: {:#}", anyhow::Error::from(e));
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} packaging units failed");
    }
    Ok(())
}

fn print_outcome(name: &str, outcome: &PackageOutcome, report: bool) -> anyhow::Result<()> {
    if report {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    let mode = match outcome.mode {
        Mode::Trace => "trace",
        Mode::Dependency => "dependency",
    };
    println!(
        "Packaged {name}: {} files ({mode}) -> {} in {}ms",
        outcome.num_files,
        outcome.bundle_path.display(),
        outcome.build_time_ms
    );
    Ok(())
}

fn warn_collapsed(name: &str, report: &CollapseReport) {
    for (package, group) in &report.pkgs {
        let versions: Vec<String> = group
            .packages
            .iter()
            .flatten()
            .map(|copy| match &copy.version {
                Some(v) => format!("{}@{v}", copy.path),
                None => copy.path.clone(),
            })
            .collect();
        tracing::warn!(
            bundle = %name,
            package = %package,
            unique_paths = group.num_unique_paths,
            total_files = group.num_total_files,
            copies = %versions.join(", "),
            "collapsed dependency files"
        );
    }
    for (dir, group) in &report.srcs {
        tracing::warn!(
            bundle = %name,
            dir = %dir,
            unique_paths = group.num_unique_paths,
            total_files = group.num_total_files,
            "collapsed source files"
        );
    }
}

fn warn_misses(name: &str, misses: &BTreeMap<String, Vec<CallSite>>) {
    for (file, sites) in misses {
        for site in sites {
            tracing::warn!(
                bundle = %name,
                file = %file,
                line = site.line,
                column = site.column,
                kind = ?site.kind,
                code = %site.code,
                "untraced require"
            );
        }
    }
}
