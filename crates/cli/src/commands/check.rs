//! `aicrew check`: validate configuration, profiles, and backends.

use aicrew_config::AppConfig;
use aicrew_retrieval::KnowledgeStore;

pub async fn run(config: &AppConfig, probe: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("aicrew check");
    println!("============\n");

    let mut issues = 0;

    // Config already loaded and validated by the time we get here
    println!("  ✅ Config valid");
    println!("     Default backend: {} ({})", config.llm.default_backend, config.llm.default_model);

    let assembly = match super::assemble(config) {
        Ok(assembly) => assembly,
        Err(e) => {
            println!("  ❌ {e}");
            return Err("check failed".into());
        }
    };

    if assembly.profiles.is_empty() {
        println!("  ⚠️  No avatar profiles in {}", config.avatar.profiles_dir.display());
        issues += 1;
    } else {
        println!("  ✅ {} avatar profile(s) loaded", assembly.profiles.len());
    }
    println!("  ✅ {} tool(s) registered: {}", assembly.tools.len(), assembly.tools.names().join(", "));

    let store = KnowledgeStore::open(&config.rag.knowledge_path);
    let records = store.len().await;
    if records == 0 {
        println!("  ⚠️  Knowledge store {} is empty, run `aicrew ingest <dir>`", store.path().display());
    } else {
        println!("  ✅ Knowledge store has {records} record(s)");
    }

    if probe {
        for (backend, healthy) in assembly.models.health_report().await {
            if healthy {
                println!("  ✅ Backend '{backend}' reachable");
            } else {
                println!("  ❌ Backend '{backend}' unreachable");
                issues += 1;
            }
        }
    } else {
        println!("     Backends: {} (use --probe to test)", assembly.models.backend_names().join(", "));
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
