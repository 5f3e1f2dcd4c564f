//! Deterministic in-process stand-ins for the model-backed capabilities.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::catalog::{Catalog, DocumentId};
use crate::config::Config;
use crate::llm::{GenerationError, GenerationRequest, GenerativeProvider};
use crate::semantic::{Candidate, EmbeddingError, EmbeddingProvider, RetrievalResult};
use crate::service::ServiceContext;

pub const DIMENSIONS: usize = 256;

pub const SAMPLE_CSV: &str = "\
name,description,job_levels,languages,assessment_length,test_types,downloads,url,remote_testing,adaptive_support,test_type
Core Java (Entry Level) (New),Multi-choice test that measures the knowledge of basic Java constructs,Entry-Level,English (USA),Approximate Completion Time in minutes = 13,Knowledge & Skills,\"['Product Fact Sheet']\",https://catalog.example.com/view/core-java-entry-level-new/,Yes,No,K
Java 8 (New),Multi-choice test that measures the knowledge of Java class design and exceptions,Mid-Professional,English (USA),Approximate Completion Time in minutes = 18,Knowledge & Skills,[],https://catalog.example.com/view/java-8-new/,Yes,Yes,K
Core Java (Advanced Level) (New),Measures advanced Java knowledge including concurrency and generics,Professional,English (USA),Approximate Completion Time in minutes = 45,Knowledge & Skills,[],https://catalog.example.com/view/core-java-advanced-level-new/,Yes,No,K
Java Web Services (New),Measures Java web services knowledge including REST and SOAP,Mid-Professional,English (USA),,Knowledge & Skills,[],https://catalog.example.com/view/java-web-services-new/,Yes,No,K
Verify - Numerical Ability,Measures the ability to make correct decisions from numerical data,Graduate,English (USA),Approximate Completion Time in minutes = 20,Ability & Aptitude,\"['Technical Manual', 'Fact Sheet']\",https://catalog.example.com/view/verify-numerical-ability/,Yes,Yes,A
Occupational Personality Questionnaire OPQ32r,Personality questionnaire describing behavioural style at work,Manager,English (USA),Approximate Completion Time in minutes = 25,Personality & Behavior,{broken,https://catalog.example.com/view/opq32r/,Yes,No,P
Python (New),Multi-choice test that measures the knowledge of Python programming,Mid-Professional,English (USA),Approximate Completion Time in minutes = 11,Knowledge & Skills,[],https://catalog.example.com/view/python-new/,Yes,No,K
SQL Server (New),Measures knowledge of SQL Server queries and database design,Mid-Professional,English (USA),Approximate Completion Time in minutes = 10,Knowledge & Skills,[],https://catalog.example.com/view/sql-server-new/,No,No,K
Entry Level Sales Solution,Simulation based solution for hiring entry level sales staff,Entry-Level,English (USA),Approximate Completion Time in minutes = 30,Simulations,[],https://catalog.example.com/view/entry-level-sales-solution/,Yes,No,S
,Row without a product name is dropped,,,,,,,,,
Agile Software Development,Measures knowledge of agile practices such as scrum and kanban,Mid-Professional,English (USA),Approximate Completion Time in minutes = 7,Knowledge & Skills,[],https://catalog.example.com/view/agile-software-development/,Yes,No,K
";

pub fn sample_catalog() -> Catalog {
    Catalog::from_reader(SAMPLE_CSV.as_bytes()).unwrap()
}

/// Config without a data directory, so nothing is persisted, and without a
/// similarity floor so every document is a candidate.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retrieval.similarity_floor = None;
    config
}

pub fn ready_service(generator: Arc<dyn GenerativeProvider>) -> ServiceContext {
    let service = ServiceContext::new(test_config());
    service
        .init(sample_catalog(), Arc::new(HashEmbedder::new()), generator)
        .unwrap();
    service
}

/// Build a retrieval result from catalog ids and similarities, in the given
/// order.
pub fn retrieval(catalog: &Catalog, hits: &[(DocumentId, f32)]) -> RetrievalResult {
    RetrievalResult {
        candidates: hits
            .iter()
            .enumerate()
            .map(|(rank, &(id, score))| Candidate {
                document: catalog.get(id).unwrap().clone(),
                score,
                rank,
            })
            .collect(),
    }
}

/// Bag of words hashed into fixed buckets.
pub struct HashEmbedder {
    pub batch_calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            batch_calls: AtomicUsize::new(0),
        }
    }
}

fn hash_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSIONS];
    for token in text
        .split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#')
        .filter(|t| t.len() >= 2)
    {
        let bucket = crc32fast::hash(token.to_lowercase().as_bytes()) as usize % DIMENSIONS;
        vector[bucket] += 1.0;
    }
    vector
}

impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash-embedder"
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(hash_vector(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

/// Pull `(id, url)` pairs out of a rendered candidate context.
pub fn context_candidates(context: &str) -> Vec<(u64, String)> {
    let mut out = vec![];
    let mut current_id = None;
    for line in context.lines() {
        if let Some(id) = line.strip_prefix("Candidate ID: ") {
            current_id = id.trim().parse::<u64>().ok();
        } else if let Some(url) = line.strip_prefix("URL: ") {
            if let Some(id) = current_id.take() {
                out.push((id, url.trim().to_string()));
            }
        }
    }
    out
}

/// Answers with every candidate in the context, in context order with
/// decreasing scores, after any extra entries.
pub struct RankingGenerator {
    pub calls: AtomicUsize,
    pub extra: Vec<Value>,
}

impl RankingGenerator {
    pub fn new() -> Self {
        Self::with_extra(vec![])
    }

    pub fn with_extra(extra: Vec<Value>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            extra,
        }
    }
}

impl GenerativeProvider for RankingGenerator {
    fn name(&self) -> &str {
        "ranking"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut recommendations = self.extra.clone();
        for (pos, (id, url)) in context_candidates(&request.context).into_iter().enumerate() {
            recommendations.push(json!({
                "id": id,
                "url": url,
                "assessment_name": "name as the model remembers it",
                "relevance_score": 0.95 - pos as f32 * 0.05,
                "relevance_explanation": "Fits the stated requirements.",
            }));
        }

        Ok(json!({ "recommendations": recommendations }).to_string())
    }
}

pub enum Reply {
    Text(String),
    Transient,
    Rejected,
}

/// Replays a fixed script of replies, after an optional delay per call.
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    delay: Duration,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(vec![]),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GenerativeProvider for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Transient) => Err(GenerationError::Transient("connection reset".into())),
            Some(Reply::Rejected) | None => Err(GenerationError::Rejected {
                status: 400,
                body: "invalid request".into(),
            }),
        }
    }
}
