pub mod core;
pub mod storage;
pub mod query;
pub mod memory;

/*
┌──────────────────────────────────────────────────────────────────────────┐
│                         SENCILLO STRUCT ARCHITECTURE                      │
└──────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── CORE LAYER ──────────────────────────────┐
│                                                                           │
│  ┌─────────────────────────────────────────────────────────────────┐    │
│  │                        struct Database                           │    │
│  │  config: Config              // file/folder/aof/compression/...  │    │
│  │  layout: StorageLayout       // (mode, collection, partition)    │    │
│  │  codec: Codec                // JSON streaming + gzip + rename   │    │
│  │  aof: AofLog                 // append-only op log               │    │
│  │  state: FairMutex<Inner>     // serializing transaction lock     │    │
│  └─────────────────────────────────────────────────────────────────┘    │
│                                                                           │
│  ┌──────────────────────┐  ┌──────────────────────┐                      │
│  │ struct Collection    │  │ struct Inner         │                      │
│  │ • stats: Stats       │  │ • collections: Map   │  (resident store)    │
│  │ • id_map             │  │ • dirty: Set<Unit>   │                      │
│  │ • secondary_indexes  │  │ • lru: ResidencyLru  │                      │
│  │ • partitions         │  │ • pending: Vec<Rec>  │                      │
│  └──────────────────────┘  └──────────────────────┘                      │
└───────────────────────────────────────────────────────────────────────────┘

┌───────────────────────────── TRANSACTION LAYER ──────────────────────────┐
│                                                                           │
│  Database::transaction(cb) ── locks ──> Tx ── ops ──> resident store     │
│        │                                 │                                │
│        │  ok: commit (AOF append | save dirty units)                      │
│        │  err: rollback (reload | evict dirty units), rethrow             │
│        │                                                                  │
│  Tx ops: create / create_many / update / destroy / find / find_many      │
│          drop_collection / drop_index / rewrite_collection /              │
│          ensure_index / stats                                             │
└───────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── QUERY LAYER ─────────────────────────────┐
│                                                                           │
│  Filter { field -> literal | {$eq,$ne,$gt,$gte,$lt,$lte,$in,$nin,$regex} │
│  DocumentMatcher: compiled filter + optional user predicate               │
│  point lookup: secondary index -> id map -> single shard                 │
│  Populate: reference field -> full document from another collection      │
└───────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────── STORAGE LAYER ────────────────────────────┐
│                                                                           │
│  single-file: <root>            + <root>.aof                              │
│  folder:      <root>/<C>.json   + <root>/log.aof                          │
│  sharded:     <root>/<C>/meta.json, <root>/<C>/shard_<p>.json             │
│  compression: every data path + .gz, gzip streamed both ways              │
│  every write: <path>.tmp, then atomic rename                              │
│                                                                           │
│  ResidencyLru: touch-ordered resident units, dirty victims saved          │
│  before eviction                                                          │
└───────────────────────────────────────────────────────────────────────────┘
*/
