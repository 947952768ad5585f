use super::*;

/// Expected hashes per difficulty-1 share: 2^32. The precise value is
/// 2^256/target_1 (~0.0015% higher) but 2^32 is the standard approximation
/// used across the mining ecosystem.
const HASHES_PER_DIFF_1: u64 = 1 << 32;

const SI_PREFIXES: &[(&str, f64)] = &[
    ("", 1.0),
    ("K", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct HashRate(pub f64);

impl HashRate {
    pub const ZERO: Self = Self(0.0);

    pub fn estimate(total_difficulty: f64, window: Duration) -> Self {
        if window.is_zero() {
            return Self::ZERO;
        }

        Self(total_difficulty * HASHES_PER_DIFF_1 as f64 / window.as_secs_f64())
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0.0 {
            return write!(f, "0 H/s");
        }

        let (prefix, divisor) = SI_PREFIXES
            .iter()
            .rev()
            .find(|(_, div)| self.0.abs() >= *div * 0.9999)
            .unwrap_or(&SI_PREFIXES[0]);

        let scaled = self.0 / divisor;

        if scaled >= 100.0 {
            write!(f, "{scaled:.0} {prefix}H/s")
        } else if scaled >= 10.0 {
            write!(f, "{scaled:.1} {prefix}H/s")
        } else {
            write!(f, "{scaled:.2} {prefix}H/s")
        }
    }
}

impl std::ops::Add for HashRate {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

/// Width of the trailing window used to estimate a worker's hashrate from
/// its recent accepted-share difficulties.
const HASHRATE_WINDOW: Duration = Duration::from_secs(600);

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub struct WorkerStats {
    pub workername: String,
    connected_at: Instant,
    connected_at_unix: u64,
    samples: Mutex<VecDeque<(Instant, f64)>>,
    shares_valid: AtomicU64,
    shares_invalid: AtomicU64,
    shares_stale: AtomicU64,
    best_share: Mutex<f64>,
    best_ever: Mutex<f64>,
    last_share: Mutex<Option<Instant>>,
    last_share_unix: Mutex<Option<u64>>,
    /// Number of currently-connected clients using this worker name. A
    /// worker is active per spec.md §3's lifecycle note (entry created on
    /// first authorize, never destroyed, only toggled inactive) exactly
    /// while this is nonzero.
    active_connections: AtomicU64,
}

impl WorkerStats {
    pub fn new(workername: String) -> Self {
        Self {
            workername,
            connected_at: Instant::now(),
            connected_at_unix: unix_now(),
            samples: Mutex::new(VecDeque::new()),
            shares_valid: AtomicU64::new(0),
            shares_invalid: AtomicU64::new(0),
            shares_stale: AtomicU64::new(0),
            best_share: Mutex::new(0.0),
            best_ever: Mutex::new(0.0),
            last_share: Mutex::new(None),
            last_share_unix: Mutex::new(None),
            active_connections: AtomicU64::new(0),
        }
    }

    pub fn mark_active(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_inactive(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active_connections.load(Ordering::Relaxed) > 0
    }

    pub fn record_valid_share(&self, difficulty: f64) {
        let now = Instant::now();

        let mut samples = self.samples.lock();
        samples.push_back((now, difficulty));
        while samples
            .front()
            .is_some_and(|(t, _)| now.duration_since(*t) > HASHRATE_WINDOW)
        {
            samples.pop_front();
        }
        drop(samples);

        self.shares_valid.fetch_add(1, Ordering::Relaxed);
        *self.last_share.lock() = Some(now);
        *self.last_share_unix.lock() = Some(unix_now());

        let mut best = self.best_share.lock();
        if difficulty > *best {
            *best = difficulty;
        }
        let mut ever = self.best_ever.lock();
        if difficulty > *ever {
            *ever = difficulty;
        }
    }

    pub fn record_invalid_share(&self) {
        self.shares_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_share(&self) {
        self.shares_stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Estimated hashrate from accepted-share difficulty over the trailing
    /// [`HASHRATE_WINDOW`], or since connecting if that was more recent.
    pub fn hash_rate(&self) -> HashRate {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return HashRate::ZERO;
        }

        let total_difficulty: f64 = samples.iter().map(|(_, d)| d).sum();
        let oldest = samples.front().unwrap().0;
        let window = Instant::now()
            .duration_since(oldest)
            .max(Duration::from_millis(1))
            .min(HASHRATE_WINDOW);

        HashRate::estimate(total_difficulty, window)
    }

    pub fn shares_valid(&self) -> u64 {
        self.shares_valid.load(Ordering::Relaxed)
    }

    pub fn shares_invalid(&self) -> u64 {
        self.shares_invalid.load(Ordering::Relaxed)
    }

    pub fn shares_stale(&self) -> u64 {
        self.shares_stale.load(Ordering::Relaxed)
    }

    pub fn best_share(&self) -> f64 {
        *self.best_share.lock()
    }

    pub fn best_ever(&self) -> f64 {
        *self.best_ever.lock()
    }

    pub fn last_share(&self) -> Option<Instant> {
        *self.last_share.lock()
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            shares: ShareCounts {
                valid: self.shares_valid(),
                invalid: self.shares_invalid(),
                stale: self.shares_stale(),
            },
            hashrate: self.hash_rate().0,
            last_share_time: *self.last_share_unix.lock(),
            connection_time: self.connected_at_unix,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShareCounts {
    pub valid: u64,
    pub invalid: u64,
    pub stale: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub shares: ShareCounts,
    pub hashrate: f64,
    pub last_share_time: Option<u64>,
    pub connection_time: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub hashrate: f64,
    pub total_shares: u64,
    pub valid_shares: u64,
    pub invalid_shares: u64,
    pub stale_shares: u64,
    pub blocks_found: u64,
    pub connected_miners: u64,
    pub uptime_seconds: u64,
    pub workers: HashMap<String, WorkerSnapshot>,
}

/// Pool-wide statistics, keyed directly by worker name (`address.workername`
/// or bare `address` when the miner supplied no worker suffix).
pub struct Stats {
    workers: DashMap<String, Arc<WorkerStats>>,
    blocks_found: AtomicU64,
    shares_valid: AtomicU64,
    shares_invalid: AtomicU64,
    shares_stale: AtomicU64,
    connections: AtomicU64,
    started: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            workers: DashMap::new(),
            blocks_found: AtomicU64::new(0),
            shares_valid: AtomicU64::new(0),
            shares_invalid: AtomicU64::new(0),
            shares_stale: AtomicU64::new(0),
            connections: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn get_or_create_worker(&self, workername: &str) -> Arc<WorkerStats> {
        self.workers
            .entry(workername.to_string())
            .or_insert_with(|| Arc::new(WorkerStats::new(workername.to_string())))
            .clone()
    }

    pub fn get_worker(&self, workername: &str) -> Option<Arc<WorkerStats>> {
        self.workers.get(workername).map(|r| r.value().clone())
    }

    pub fn record_valid_share(&self, workername: &str, difficulty: f64) {
        self.get_or_create_worker(workername)
            .record_valid_share(difficulty);
        self.shares_valid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_share(&self, workername: &str) {
        if let Some(worker) = self.get_worker(workername) {
            worker.record_invalid_share();
        }
        self.shares_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_share(&self, workername: &str) {
        if let Some(worker) = self.get_worker(workername) {
            worker.record_stale_share();
        }
        self.shares_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_block(&self) {
        self.blocks_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sub_connection(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn hash_rate(&self) -> HashRate {
        self.workers
            .iter()
            .map(|w| w.hash_rate())
            .fold(HashRate::ZERO, |acc, r| acc + r)
    }

    pub fn blocks_found(&self) -> u64 {
        self.blocks_found.load(Ordering::Relaxed)
    }

    pub fn shares_valid(&self) -> u64 {
        self.shares_valid.load(Ordering::Relaxed)
    }

    pub fn shares_invalid(&self) -> u64 {
        self.shares_invalid.load(Ordering::Relaxed)
    }

    pub fn shares_stale(&self) -> u64 {
        self.shares_stale.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn total_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn workers(&self) -> Vec<Arc<WorkerStats>> {
        self.workers.iter().map(|r| r.value().clone()).collect()
    }

    /// Pool-level and per-worker statistics, shaped for the read-only
    /// dashboard this crate does not itself host.
    pub fn snapshot(&self) -> PoolSnapshot {
        let valid_shares = self.shares_valid();
        let invalid_shares = self.shares_invalid();
        let stale_shares = self.shares_stale();

        PoolSnapshot {
            hashrate: self.hash_rate().0,
            total_shares: valid_shares + invalid_shares + stale_shares,
            valid_shares,
            invalid_shares,
            stale_shares,
            blocks_found: self.blocks_found(),
            connected_miners: self.total_connections(),
            uptime_seconds: self.uptime().as_secs(),
            workers: self
                .workers
                .iter()
                .map(|r| (r.key().clone(), r.value().snapshot()))
                .collect(),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashrate_display_formatting() {
        let cases = [
            (0.0, "0 H/s"),
            (1e3, "1.00 KH/s"),
            (1e12, "1.00 TH/s"),
            (314e15, "314 PH/s"),
            (45.6e12, "45.6 TH/s"),
        ];

        for (value, expected) in cases {
            assert_eq!(HashRate(value).to_string(), expected, "for value {value}");
        }
    }

    #[test]
    fn hashrate_estimate_matches_diff1_approximation() {
        let rate = HashRate::estimate(60.0, Duration::from_secs(60));
        assert_eq!(rate.0, HASHES_PER_DIFF_1 as f64);
    }

    #[test]
    fn new_stats_start_at_zero() {
        let stats = Stats::new();
        assert_eq!(stats.total_connections(), 0);
        assert_eq!(stats.shares_valid(), 0);
        assert_eq!(stats.blocks_found(), 0);
        assert_eq!(stats.total_workers(), 0);
    }

    #[test]
    fn connection_count_increments_and_decrements() {
        let stats = Stats::new();
        stats.add_connection();
        stats.add_connection();
        assert_eq!(stats.total_connections(), 2);
        stats.sub_connection();
        assert_eq!(stats.total_connections(), 1);
    }

    #[test]
    fn get_or_create_worker_is_idempotent() {
        let stats = Stats::new();
        let a = stats.get_or_create_worker("bc1q...worker1");
        let b = stats.get_or_create_worker("bc1q...worker1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(stats.total_workers(), 1);
    }

    #[test]
    fn record_valid_share_updates_counters_and_best() {
        let stats = Stats::new();
        stats.get_or_create_worker("rig1");
        stats.record_valid_share("rig1", 100.0);
        stats.record_valid_share("rig1", 50.0);
        stats.record_valid_share("rig1", 200.0);

        assert_eq!(stats.shares_valid(), 3);
        let worker = stats.get_worker("rig1").unwrap();
        assert_eq!(worker.shares_valid(), 3);
        assert_eq!(worker.best_share(), 200.0);
        assert_eq!(worker.best_ever(), 200.0);
        assert!(worker.last_share().is_some());
    }

    #[test]
    fn record_invalid_and_stale_tracked_separately_from_valid() {
        let stats = Stats::new();
        stats.get_or_create_worker("rig1");
        stats.record_valid_share("rig1", 10.0);
        stats.record_invalid_share("rig1");
        stats.record_stale_share("rig1");

        let worker = stats.get_worker("rig1").unwrap();
        assert_eq!(worker.shares_valid(), 1);
        assert_eq!(worker.shares_invalid(), 1);
        assert_eq!(worker.shares_stale(), 1);
        assert_eq!(stats.shares_valid(), 1);
        assert_eq!(stats.shares_invalid(), 1);
        assert_eq!(stats.shares_stale(), 1);
    }

    #[test]
    fn hash_rate_is_zero_with_no_shares() {
        let worker = WorkerStats::new("rig1".to_string());
        assert_eq!(worker.hash_rate(), HashRate::ZERO);
    }

    #[test]
    fn hash_rate_is_positive_after_shares() {
        let stats = Stats::new();
        stats.get_or_create_worker("rig1");
        stats.record_valid_share("rig1", 1000.0);

        let rate = stats.hash_rate();
        assert!(rate.0 > 0.0, "hashrate should be positive: {rate}");
    }

    #[test]
    fn invalid_share_for_unknown_worker_does_not_panic() {
        let stats = Stats::new();
        stats.record_invalid_share("ghost");
        assert_eq!(stats.shares_invalid(), 1);
    }

    #[test]
    fn worker_is_active_only_while_referenced() {
        let worker = WorkerStats::new("rig1".to_string());
        assert!(!worker.is_active());
        worker.mark_active();
        worker.mark_active();
        assert!(worker.is_active());
        worker.mark_inactive();
        assert!(worker.is_active());
        worker.mark_inactive();
        assert!(!worker.is_active());
    }

    #[test]
    fn snapshot_reflects_pool_and_worker_state() {
        let stats = Stats::new();
        stats.add_connection();
        stats.add_block();
        stats.get_or_create_worker("rig1").mark_active();
        stats.record_valid_share("rig1", 10.0);
        stats.record_invalid_share("rig1");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.blocks_found, 1);
        assert_eq!(snapshot.connected_miners, 1);
        assert_eq!(snapshot.valid_shares, 1);
        assert_eq!(snapshot.invalid_shares, 1);
        assert_eq!(snapshot.total_shares, 2);

        let worker = snapshot.workers.get("rig1").unwrap();
        assert_eq!(worker.shares.valid, 1);
        assert_eq!(worker.shares.invalid, 1);
        assert!(worker.last_share_time.is_some());
        assert!(worker.connection_time > 0);
    }
}
