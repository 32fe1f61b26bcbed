use async_trait::async_trait;
use freight_core::context::{BoxedContext, DependencyContext, DependencyId, Resolution};
use freight_core::{
    Config, FetchContext, FetchFlow, FingerprintView, RepoFetcher, RepoKey, RepoRule, RuleError,
    RuleExecutor, StateStore, REPO_FILE, SEMANTICS,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A stand-in for the engine's value table. Every pass gets a fresh context
/// over it, exactly like the engine hands out a new one per restart.
#[derive(Default, Clone)]
struct Engine {
    values: Arc<Mutex<HashMap<DependencyId, Value>>>,
}

impl Engine {
    fn set(&self, id: DependencyId, value: Value) {
        self.values.lock().unwrap().insert(id, value);
    }

    fn context(&self) -> BoxedContext {
        Box::new(EngineContext {
            engine: self.clone(),
            missed: AtomicBool::new(false),
        })
    }
}

struct EngineContext {
    engine: Engine,
    missed: AtomicBool,
}

#[async_trait]
impl DependencyContext for EngineContext {
    async fn resolve(&self, id: &DependencyId) -> Resolution {
        match self.engine.values.lock().unwrap().get(id) {
            Some(value) => Resolution::Resolved(value.clone()),
            None => {
                self.missed.store(true, Ordering::SeqCst);
                Resolution::NotReady
            }
        }
    }

    fn has_pending_requests(&self) -> bool {
        self.missed.load(Ordering::SeqCst)
    }
}

/// The rule under test: reads a pinned lockfile and an access token, then
/// materializes a build file into the repository.
#[derive(Clone)]
struct LockfileRule;

#[async_trait]
impl RuleExecutor for LockfileRule {
    async fn execute(
        &mut self,
        _rule: &RepoRule,
        ctx: &mut FetchContext<'_>,
    ) -> Result<Value, RuleError> {
        let lockfile = ctx.read("@deps//:lock.json").await?;
        let token = ctx.getenv("TOKEN").await?;
        ctx.print("pinning repository to the lockfile revision");

        let build_file = ctx.repo_root().join("BUILD");
        tokio::fs::write(&build_file, &lockfile)
            .await
            .map_err(|err| RuleError::CouldNotWriteFile {
                file: build_file,
                err,
            })?;

        Ok(json!({ "locked": true, "authenticated": token.is_some() }))
    }
}

struct CurrentFacts {
    semantics_digest: String,
    env: HashMap<String, String>,
    files: HashMap<String, String>,
}

impl FingerprintView for CurrentFacts {
    fn semantics_digest(&self) -> Option<String> {
        Some(self.semantics_digest.clone())
    }

    fn env_var(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    fn file_digest(&self, label: &str) -> Option<String> {
        self.files.get(label).cloned()
    }

    fn repo_mapping(&self, _from: &str, _alias: &str) -> Option<String> {
        None
    }
}

#[tokio::test]
async fn a_fetch_survives_restarts_and_records_its_inputs() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let repo_root = tmp.path().join("repos/acme");

    let lock_path = tmp.path().join("lock.json");
    std::fs::write(&lock_path, "{\"rev\": \"abc123\"}").unwrap();

    let engine = Engine::default();
    engine.set(DependencyId::Semantics, json!({"version": 7}));
    engine.set(
        DependencyId::File("@deps//:lock.json".to_string()),
        json!(lock_path.to_str().unwrap()),
    );

    let config = Config::builder().env(HashMap::new()).build().unwrap();
    let states = Arc::new(StateStore::new());
    let fetcher = RepoFetcher::new(config, LockfileRule, states.clone());

    let key = RepoKey::new("acme");
    let rule = Arc::new(RepoRule::builder().name("lockfile_repo").build().unwrap());

    // the token is not known yet: the rule parks inside `getenv`
    let flow = fetcher
        .fetch(&key, rule.clone(), &repo_root, engine.context())
        .await
        .unwrap();
    assert!(matches!(flow, FetchFlow::Restart));
    assert!(states.is_tracking(&key));

    engine.set(DependencyId::EnvVar("TOKEN".to_string()), json!("sekret"));

    let flow = fetcher
        .fetch(&key, rule, &repo_root, engine.context())
        .await
        .unwrap();
    let (repo_dir, fingerprint) = match flow {
        FetchFlow::Complete {
            repo_dir,
            fingerprint,
        } => (repo_dir, fingerprint),
        FetchFlow::Restart => panic!("expected the fetch to complete"),
    };

    assert_eq!(repo_dir.path(), repo_root);
    assert_eq!(
        std::fs::read_to_string(repo_root.join("BUILD")).unwrap(),
        "{\"rev\": \"abc123\"}"
    );
    assert!(repo_root.join(REPO_FILE).exists());
    assert!(states.is_empty());

    // every fact the rule read is in the record
    let semantics_digest = fingerprint.get(SEMANTICS).unwrap().to_string();
    let file_digest = fingerprint.get("FILE:@deps//:lock.json").unwrap().to_string();
    assert_eq!(fingerprint.get("ENV:TOKEN"), Some("sekret"));

    // and the record accepts reuse until one of them changes
    let mut facts = CurrentFacts {
        semantics_digest,
        env: [("TOKEN".to_string(), "sekret".to_string())].into(),
        files: [("@deps//:lock.json".to_string(), file_digest)].into(),
    };
    assert!(fingerprint.is_up_to_date(&facts));

    facts.env.insert("TOKEN".to_string(), "rotated".to_string());
    assert!(!fingerprint.is_up_to_date(&facts));
}
