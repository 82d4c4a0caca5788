pub mod core;
pub mod storage;
pub mod analysis;
pub mod schema;
pub mod index;
pub mod search;
pub mod query;
pub mod mvcc;
pub mod writer;

/*
┌──────────────────────────────────────────────────────────────────────────────────────┐
│                              TALLYDB STRUCT ARCHITECTURE                             │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────────── CORE LAYER ────────────────────────────────────┐
│                                                                                      │
│  ┌────────────────────────────────────────────────────────────────────────────────┐  │
│  │                               struct Database                                  │  │
│  │  config: Config                      // Identity property, timeouts, caps      │  │
│  │  store: Arc<DocumentStore>           // Documents + write log                  │  │
│  │  analyzers: Arc<AnalyzerRegistry>    // Named analyzers for analyzed fields    │  │
│  │  engine: Arc<IndexEngine>            // One worker thread per index            │  │
│  │  cache: Option<QueryCache>           // Paged entry keys per snapshot          │  │
│  └────────────────────────────────────────────────────────────────────────────────┘  │
│                                                                                      │
│  ┌──────────────────────┐  ┌──────────────────────┐  ┌────────────────────────────┐  │
│  │ struct Session<'db>  │  │ struct Document      │  │ enum Value                 │  │
│  │ • arena: Vec<Tracked>│  │ • id, collection     │  │ • Null / Bool / Number     │  │
│  │ • by_id: HashMap<..> │  │ • body: Fields       │  │ • Text / Date              │  │
│  │ • options            │  │ • etag: Etag         │  │ • List / Object(Fields)    │  │
│  └──────────────────────┘  └──────────────────────┘  └────────────────────────────┘  │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── STORAGE LAYER ───────────────────────────────────┐
│                                                                                      │
│  DocumentStore::commit(WriteBatch)                                                   │
│    1. validate every op (etags, ids, suffix ids)      ── nothing applied on error    │
│    2. sequence += 1, apply ops, append LogEntry per op                               │
│    3. notify CommitObservers (still under the write lock → ordered by sequence)      │
│                                                                                      │
│  WriteLog frame: [len u32 LE][crc32 u32 LE][bincode LogEntry]                        │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌───────────────────────────────────── INDEX LAYER ────────────────────────────────────┐
│                                                                                      │
│  IndexEngine ──CommitNotice──► crossbeam channel ──► IndexWorker (thread "index:N")  │
│                                                        │                             │
│       map ──► map_entries ──► reduce (touched keys / all entries) ──► entries        │
│                                                        │                             │
│                                                        ▼                             │
│  SnapshotCell<IndexSnapshot> ◄── publish ──┘   then StalenessMarker::advance(seq)    │
│                                                                                      │
│  ┌──────────────────────────┐  ┌─────────────────────────┐  ┌─────────────────────┐  │
│  │ struct IndexSnapshot     │  │ struct InvertedIndex    │  │ enum EntryKey       │  │
│  │ • sequence: u64          │  │ • postings: Term→List   │  │ • Document{id,..}   │  │
│  │ • entries: Arc<BTreeMap> │  │ • field_norm per entry  │  │ • Reduce(ReduceKey) │  │
│  │ • postings, fields       │  └─────────────────────────┘  └─────────────────────┘  │
│  │ • errors                 │                                                        │
│  └──────────────────────────┘                                                        │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌───────────────────────────────────── SEARCH LAYER ───────────────────────────────────┐
│                                                                                      │
│  QueryExecutor::execute(handle, request)                                             │
│    wait (optional) → validate → match + score → order → page → transform → project   │
│                                                                                      │
│  ┌─────────────────────┐  ┌──────────────────────┐  ┌─────────────────────────────┐  │
│  │ enum Query (AST)    │  │ struct EntryMatcher  │  │ struct QueryResults         │  │
│  │ • MatchAll / Equals │  │ • schema, postings   │  │ • hits: Vec<QueryHit>       │  │
│  │ • Range / In        │  │ • analyzers          │  │ • stats: QueryStats         │  │
│  │ • Search / Exists   │  └──────────────────────┘  └─────────────────────────────┘  │
│  │ • Bool              │                                                             │
│  └─────────────────────┘                                                             │
└──────────────────────────────────────────────────────────────────────────────────────┘
*/
