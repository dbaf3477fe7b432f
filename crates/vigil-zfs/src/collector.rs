//! One collection cycle: list pools, read each pool's status, resolve device
//! identities, correlate serials and aggregate error counters.

use crate::command::CancelToken;
use crate::history::parse_scrub_history;
use crate::host::HostnameSource;
use crate::identity::IdentityResolver;
use crate::list::parse_pool_list;
use crate::locate::ToolLocator;
use crate::serial::{SerialCorrelator, SerialTools};
use crate::status::parse_pool_status;
use crate::system::SystemZpool;
use chrono::Utc;
use log::{debug, info, warn};
use vigil_core::config::VigilConfig;
use vigil_core::error::{VigilError, VigilResult};
use vigil_core::model::{Pool, Report};
use vigil_core::provider::ZpoolTool;

pub struct ZfsCollector<T: ZpoolTool> {
    tool: T,
    resolver: IdentityResolver,
    correlator: Option<SerialCorrelator>,
    hostname: HostnameSource,
    cancel: CancelToken,
    resolve_paths: bool,
    collect_history: bool,
}

impl ZfsCollector<SystemZpool> {
    /// Wire the collector to the host's tools as configured.
    pub fn from_config(config: &VigilConfig, cancel: CancelToken) -> Self {
        let locator = config
            .tool_overrides()
            .into_iter()
            .fold(ToolLocator::default(), |locator, (tool, path)| {
                locator.with_override(tool, path)
            });
        let timeout = config.zfs_timeout();
        let probe_timeout = config.probe_timeout();

        let tool = match config.zpool_binary_path() {
            Some(path) => SystemZpool::with_path(path, timeout, cancel.clone())
                .unwrap_or_else(|err| {
                    warn!("{err}; reporting zfs as unavailable");
                    SystemZpool::unavailable()
                }),
            None => SystemZpool::from_locator(&locator, timeout, &cancel),
        };
        let resolver = IdentityResolver::new(config.dev_root())
            .with_glabel(locator.runner("glabel", timeout, &cancel));
        let correlator = config.serial.enabled.then(|| {
            let tools = SerialTools {
                smartctl: locator.runner("smartctl", probe_timeout, &cancel),
                lsblk: locator.runner("lsblk", probe_timeout, &cancel),
                hdparm: locator.runner("hdparm", probe_timeout, &cancel),
                sysctl: locator.runner("sysctl", probe_timeout, &cancel),
            };
            SerialCorrelator::new(config.dev_root(), config.sys_root(), tools)
        });
        let hostname = HostnameSource::new(config.agent.hostname.clone(), config.proc_root())
            .with_tool(locator.runner("hostname", probe_timeout, &cancel));

        Self::new(tool, resolver, cancel)
            .with_correlator(correlator)
            .with_hostname(hostname)
            .with_resolve_paths(config.zfs.resolve_paths)
            .with_history(config.zfs.collect_history)
    }
}

impl<T: ZpoolTool> ZfsCollector<T> {
    pub fn new(tool: T, resolver: IdentityResolver, cancel: CancelToken) -> Self {
        Self {
            tool,
            resolver,
            correlator: None,
            hostname: HostnameSource::new(None, "/proc"),
            cancel,
            resolve_paths: true,
            collect_history: false,
        }
    }

    pub fn with_correlator(mut self, correlator: Option<SerialCorrelator>) -> Self {
        self.correlator = correlator;
        self
    }

    pub fn with_hostname(mut self, hostname: HostnameSource) -> Self {
        self.hostname = hostname;
        self
    }

    pub fn with_resolve_paths(mut self, resolve_paths: bool) -> Self {
        self.resolve_paths = resolve_paths;
        self
    }

    pub fn with_history(mut self, collect_history: bool) -> Self {
        self.collect_history = collect_history;
        self
    }

    /// Run one cycle. Only cancellation is an error; every other failure
    /// degrades the report and is logged.
    pub fn collect(&self) -> VigilResult<Report> {
        self.cancel.check()?;
        let hostname = self.hostname.detect()?;
        let collected_at = Utc::now();

        if !self.tool.available() {
            info!("zpool not found on {hostname}; reporting ZFS as unavailable");
            return Ok(Report::unavailable(hostname, collected_at));
        }

        let mut pools = self.list_pools()?;
        for pool in &mut pools {
            self.cancel.check()?;
            self.fill_status(pool)?;
            if self.collect_history {
                self.fill_history(pool)?;
            }
            self.resolver.resolve_tree(&mut pool.devices);
        }

        self.correlate_serials(&mut pools)?;
        for pool in &mut pools {
            pool.aggregate_errors();
        }
        self.cancel.check()?;

        info!(
            "collected {} pool(s) on {hostname}: {} data disk(s), {} device error(s)",
            pools.len(),
            pools.iter().map(Pool::device_count).sum::<usize>(),
            pools.iter().map(|p| p.errors.total()).sum::<u64>()
        );
        Ok(Report {
            hostname,
            collected_at,
            zfs_available: true,
            pools,
        })
    }

    fn list_pools(&self) -> VigilResult<Vec<Pool>> {
        let Some(out) = soften(self.tool.list(), "zpool list")? else {
            return Ok(Vec::new());
        };
        let pools = parse_pool_list(&out.stdout);
        if pools.is_empty() {
            debug!("zpool list returned no pools");
        }
        Ok(pools)
    }

    /// `-LP` first when enabled, then the plain form. A pool whose status
    /// cannot be read keeps its list-level fields.
    fn fill_status(&self, pool: &mut Pool) -> VigilResult<()> {
        let mut output = None;
        if self.resolve_paths {
            match self.tool.status(&pool.name, true) {
                Ok(out) => output = Some(out),
                Err(VigilError::Cancelled) => return Err(VigilError::Cancelled),
                Err(err) => debug!("zpool status -LP {} failed, retrying plain: {err}", pool.name),
            }
        }
        if output.is_none() {
            output = soften(self.tool.status(&pool.name, false), "zpool status")?;
        }

        match output {
            Some(out) => parse_pool_status(&out.stdout, &pool.name).merge_into(pool),
            None => warn!("status unavailable for pool {}; keeping list data only", pool.name),
        }
        Ok(())
    }

    fn fill_history(&self, pool: &mut Pool) -> VigilResult<()> {
        if let Some(out) = soften(self.tool.history(&pool.name), "zpool history")? {
            pool.scrub_history = parse_scrub_history(&out.stdout);
        }
        Ok(())
    }

    /// One serial map per host, shared by every pool.
    fn correlate_serials(&self, pools: &mut [Pool]) -> VigilResult<()> {
        let Some(correlator) = &self.correlator else {
            return Ok(());
        };
        if pools.iter().all(|p| p.devices.is_empty()) {
            return Ok(());
        }
        let map = correlator.build_map()?;
        for pool in pools.iter_mut() {
            correlator.apply(&map, &mut pool.devices)?;
        }
        Ok(())
    }
}

/// Keep cancellation fatal, log anything else and carry on without the value.
fn soften<V>(result: VigilResult<V>, what: &str) -> VigilResult<Option<V>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(VigilError::Cancelled) => Err(VigilError::Cancelled),
        Err(err) => {
            warn!("{what} failed: {err}");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use vigil_core::model::{HealthState, ScanState, VdevType};
    use vigil_core::provider::ToolOutput;

    const LIST: &str = concat!(
        "tank\t1000000000\t500000000\t500000000\t5\t50\t1.00x\tONLINE\t-\t12345678\n",
        "backup\t2000000000\t100000000\t1900000000\t1\t5\t1.00x\tONLINE\t-\t87654321\n",
    );

    const TANK_STATUS: &str = concat!(
        "  pool: tank\n",
        " state: DEGRADED\n",
        "  scan: resilver in progress since Tue Mar  5 01:00:00 2024\n",
        "\t512G scanned at 10M/s, 1.00T total\n",
        "\t5.12% done, 02:30:00 to go\n",
        "config:\n",
        "\n",
        "\tNAME          STATE     READ WRITE CKSUM\n",
        "\ttank          DEGRADED     0     0     1\n",
        "\t  mirror-0    DEGRADED     0     0     0\n",
        "\t    sda       ONLINE       0     0     0\n",
        "\t    replacing-1  DEGRADED  0     0     0\n",
        "\t      sdb     FAULTED      4     0     0\n",
        "\t      sdc     ONLINE       0     0     0  (resilvering)\n",
        "\tspares\n",
        "\t  sdd         INUSE\n",
        "\n",
        "errors: No known data errors\n",
    );

    #[derive(Default)]
    struct FakeZpool {
        available: bool,
        list: Option<String>,
        /// keyed by (pool, resolve_paths)
        status: HashMap<(String, bool), String>,
        history: HashMap<String, String>,
        cancel_on_status: Option<CancelToken>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeZpool {
        fn with_pools() -> Self {
            Self {
                available: true,
                list: Some(LIST.to_string()),
                ..Self::default()
            }
        }

        fn output(stdout: &str) -> ToolOutput {
            ToolOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                status: 0,
            }
        }
    }

    impl ZpoolTool for FakeZpool {
        fn available(&self) -> bool {
            self.available
        }

        fn list(&self) -> VigilResult<ToolOutput> {
            self.calls.borrow_mut().push("list".into());
            self.list
                .as_deref()
                .map(Self::output)
                .ok_or_else(|| VigilError::Provider("list failed".into()))
        }

        fn status(&self, pool: &str, resolve_paths: bool) -> VigilResult<ToolOutput> {
            self.calls
                .borrow_mut()
                .push(format!("status {pool} {resolve_paths}"));
            if let Some(cancel) = &self.cancel_on_status {
                cancel.cancel();
                return Err(VigilError::Cancelled);
            }
            self.status
                .get(&(pool.to_string(), resolve_paths))
                .map(|s| Self::output(s))
                .ok_or_else(|| VigilError::Provider(format!("no status for {pool}")))
        }

        fn history(&self, pool: &str) -> VigilResult<ToolOutput> {
            self.history
                .get(pool)
                .map(|s| Self::output(s))
                .ok_or_else(|| VigilError::Provider(format!("no history for {pool}")))
        }
    }

    fn collector(tool: FakeZpool) -> ZfsCollector<FakeZpool> {
        ZfsCollector::new(
            tool,
            IdentityResolver::new("/nonexistent-dev-root"),
            CancelToken::new(),
        )
        .with_hostname(HostnameSource::new(Some("nas01".into()), "/nonexistent-proc"))
    }

    #[test]
    fn unavailable_tool_is_not_an_error() {
        let report = collector(FakeZpool::default()).collect().unwrap();
        assert!(!report.zfs_available);
        assert!(report.pools.is_empty());
        assert_eq!(report.hostname, "nas01");
    }

    #[test]
    fn empty_listing_reports_no_pools() {
        let tool = FakeZpool {
            available: true,
            list: Some(String::new()),
            ..FakeZpool::default()
        };
        let report = collector(tool).collect().unwrap();
        assert!(report.zfs_available);
        assert!(report.pools.is_empty());
    }

    #[test]
    fn list_failure_degrades_to_empty_report() {
        let tool = FakeZpool {
            available: true,
            ..FakeZpool::default()
        };
        let report = collector(tool).collect().unwrap();
        assert!(report.zfs_available);
        assert!(report.pools.is_empty());
    }

    #[test]
    fn merges_status_and_keeps_failed_pools() {
        let mut tool = FakeZpool::with_pools();
        // -LP unsupported on this host: only the plain form answers
        tool.status
            .insert(("tank".into(), false), TANK_STATUS.to_string());
        let collector = collector(tool);
        let report = collector.collect().unwrap();

        assert_eq!(
            collector.tool.calls.borrow().as_slice(),
            [
                "list",
                "status tank true",
                "status tank false",
                "status backup true",
                "status backup false",
            ]
        );
        assert_eq!(report.pools.len(), 2);

        let tank = &report.pools[0];
        assert_eq!(tank.health, HealthState::Degraded);
        assert_eq!(tank.guid.as_deref(), Some("12345678"));
        let scan = tank.scan.as_ref().unwrap();
        assert_eq!(scan.state, ScanState::Scanning);
        assert_eq!(scan.time_remaining_secs, 9000);
        assert_eq!(tank.errors.read, 4);
        assert_eq!(tank.errors.checksum, 1);
        assert_eq!(tank.device_count(), 3);

        let mirror = &tank.devices[0];
        assert_eq!(mirror.vdev_type, VdevType::Mirror);
        let sda = &mirror.children[0];
        assert_eq!(sda.path, "/nonexistent-dev-root/sda");
        assert!(mirror.children[1..].iter().all(|d| d.is_replacing));
        let spare = &tank.devices[1].children[0];
        assert_eq!(spare.state, HealthState::InUse);
        assert!(spare.is_spare);

        let backup = &report.pools[1];
        assert_eq!(backup.name, "backup");
        assert_eq!(backup.health, HealthState::Online);
        assert_eq!(backup.size_bytes, 2_000_000_000);
        assert!(backup.devices.is_empty());
        assert!(backup.scan.is_none());
    }

    #[test]
    fn plain_status_only_when_path_resolution_disabled() {
        let mut tool = FakeZpool::with_pools();
        tool.list = Some(LIST.lines().next().unwrap_or_default().to_string());
        tool.status
            .insert(("tank".into(), false), TANK_STATUS.to_string());
        let collector = collector(tool).with_resolve_paths(false);
        collector.collect().unwrap();
        assert_eq!(
            collector.tool.calls.borrow().as_slice(),
            ["list", "status tank false"]
        );
    }

    #[test]
    fn cancellation_aborts_the_cycle() {
        let cancel = CancelToken::new();
        let mut tool = FakeZpool::with_pools();
        tool.cancel_on_status = Some(cancel.clone());
        let collector = ZfsCollector::new(tool, IdentityResolver::new("/nonexistent-dev-root"), cancel)
            .with_hostname(HostnameSource::new(Some("nas01".into()), "/nonexistent-proc"));
        let err = collector.collect().unwrap_err();
        assert!(err.is_cancelled());
        assert!(collector.collect().unwrap_err().is_cancelled());
    }

    #[test]
    fn scrub_history_when_enabled() {
        let mut tool = FakeZpool::with_pools();
        tool.status
            .insert(("tank".into(), true), TANK_STATUS.to_string());
        tool.history.insert(
            "tank".into(),
            "History for 'tank':\n2024-03-05.01:00:00 zpool scrub tank\n".into(),
        );
        let report = collector(tool).with_history(true).collect().unwrap();
        assert_eq!(report.pools[0].scrub_history.len(), 1);
        assert_eq!(report.pools[0].scrub_history[0].command, "zpool scrub tank");
        assert!(report.pools[1].scrub_history.is_empty());
    }

    #[test]
    fn configured_zpool_path_that_is_missing_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = VigilConfig::default();
        cfg.agent.hostname = Some("nas01".into());
        cfg.zfs.zpool_path = Some(dir.path().join("zpool").to_string_lossy().into_owned());
        cfg.serial.enabled = false;

        let collector = ZfsCollector::from_config(&cfg, CancelToken::new());
        assert_eq!(collector.tool.binary(), None);
        let report = collector.collect().unwrap();
        assert!(!report.zfs_available);
        assert_eq!(report.hostname, "nas01");
    }
}
