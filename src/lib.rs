pub mod core;
pub mod feature;
pub mod index;
pub mod matcher;
pub mod storage;
pub mod server;

/*
┌──────────────────────────────────────────────────────────────────────────────────────┐
│                              SIMSTORE STRUCT ARCHITECTURE                             │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── SERVER LAYER ────────────────────────────────────┐
│                                                                                        │
│  ┌────────────────────────────────────────────────────────────────────────────────┐  │
│  │                               struct Server                                     │  │
│  │  config: Config                        // deployment-wide settings              │  │
│  │  storage: StorageLayout                // root/shards/NNNN, root/meta           │  │
│  │  translator: NameTranslator            // external db id → shard index          │  │
│  │  extractor: Box<dyn Extractor>         // raw media → Object                    │  │
│  │  shards: Vec<RwLock<Option<Arc<Shard>>>> // mapped ones opened at start         │  │
│  └────────────────────────────────────────────────────────────────────────────────┘  │
│                                                                                        │
│  ┌────────────────────────────────────────────────────────────────────────────────┐  │
│  │                               struct Shard                                      │  │
│  │  journal: Journal                      // append-only log, own mutex            │  │
│  │  matcher: Matcher                      // Trivial | Counting | Emd              │  │
│  │  state: RwLock<ShardState>             // one lock for all three below          │  │
│  │    records: RecordStore                // append-only, Arc<Record>              │  │
│  │    lookup: HashMap<String, ObjectId>   // key → internal id                     │  │
│  │    index: Box<dyn Index>               // Graph | Linear | Lsh | Inverted       │  │
│  └────────────────────────────────────────────────────────────────────────────────┘  │
└────────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── SEARCH FLOW ─────────────────────────────────────┐
│                                                                                        │
│  query Object ──► per part: Index.search ──► Candidates (object → Hints)              │
│                   (shared lock)                    │                                   │
│                                                    ▼                                   │
│                   Matcher.apply ──► threshold R ──► sort by polarity ──► top K Hits    │
│                   (no lock)                                                            │
└────────────────────────────────────────────────────────────────────────────────────────┘
*/
