//! IP lease pool
//!
//! `LeasePool` owns an inclusive IPv4 range, the MAC → lease table and the
//! IP → MAC reverse index. Both maps live behind one private mutex so they
//! can never drift apart; callers only see the operations below.
//!
//! Expiry is checked lazily: `get_lease` reports an expired lease as an
//! error but the address stays bound to its MAC until `release` is called
//! or the same MAC allocates again.

use crate::error::PoolError;
use chrono::{DateTime, Duration, Utc};
use nodefoundry_common::normalize_mac;
use serde::Serialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A time-bounded MAC → IP binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    pub mac: String,
    pub ip: Ipv4Addr,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Unvalidated pool settings, as they come from configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub start: String,
    pub end: String,
    pub netmask: String,
    /// Empty or None means no router option is sent
    pub gateway: Option<String>,
    pub dns: Vec<String>,
    /// Lease duration in seconds
    pub lease_time: u32,
}

impl PoolConfig {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            netmask: "255.255.255.0".to_string(),
            gateway: None,
            dns: Vec::new(),
            lease_time: 86400,
        }
    }

    pub fn with_netmask(mut self, netmask: impl Into<String>) -> Self {
        self.netmask = netmask.into();
        self
    }

    pub fn with_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = Some(gateway.into());
        self
    }

    pub fn with_dns(mut self, dns: impl Into<String>) -> Self {
        self.dns.push(dns.into());
        self
    }

    pub fn with_lease_time(mut self, seconds: u32) -> Self {
        self.lease_time = seconds;
        self
    }
}

#[derive(Debug, Default)]
struct LeaseTable {
    /// mac → lease
    leases: HashMap<String, Lease>,
    /// ip → mac
    allocated: HashMap<Ipv4Addr, String>,
}

impl LeaseTable {
    fn bind(&mut self, mac: String, ip: Ipv4Addr, expires_at: DateTime<Utc>) -> Ipv4Addr {
        self.allocated.insert(ip, mac.clone());
        self.leases.insert(
            mac.clone(),
            Lease {
                mac,
                ip,
                expires_at,
            },
        );
        ip
    }
}

/// IP address pool with lease bookkeeping
#[derive(Debug)]
pub struct LeasePool {
    start: u32,
    end: u32,
    netmask: Ipv4Addr,
    gateway: Option<Ipv4Addr>,
    dns: Vec<Ipv4Addr>,
    lease_time: u32,
    table: Mutex<LeaseTable>,
}

impl LeasePool {
    /// Validate the configuration and build an empty pool.
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        let start: Ipv4Addr = config
            .start
            .parse()
            .map_err(|_| PoolError::InvalidPoolBounds(format!("start {:?}", config.start)))?;
        let end: Ipv4Addr = config
            .end
            .parse()
            .map_err(|_| PoolError::InvalidPoolBounds(format!("end {:?}", config.end)))?;
        if u32::from(start) > u32::from(end) {
            return Err(PoolError::InvalidPoolBounds(format!(
                "start {} is after end {}",
                start, end
            )));
        }

        let netmask: Ipv4Addr = config
            .netmask
            .parse()
            .map_err(|_| PoolError::InvalidNetmask(config.netmask.clone()))?;

        let gateway = match config.gateway.as_deref() {
            None | Some("") => None,
            Some(gw) => Some(
                gw.parse::<Ipv4Addr>()
                    .map_err(|_| PoolError::InvalidGateway(gw.to_string()))?,
            ),
        };

        // IPv6 resolvers parse fine but cannot be handed out over DHCPv4
        let mut dns = Vec::with_capacity(config.dns.len());
        for entry in &config.dns {
            match entry.parse::<IpAddr>() {
                Ok(IpAddr::V4(v4)) => dns.push(v4),
                Ok(IpAddr::V6(_)) => {}
                Err(_) => return Err(PoolError::InvalidDns(entry.clone())),
            }
        }

        Ok(Self {
            start: start.into(),
            end: end.into(),
            netmask,
            gateway,
            dns,
            lease_time: config.lease_time,
            table: Mutex::new(LeaseTable::default()),
        })
    }

    /// Allocate an address for `mac`.
    ///
    /// An existing lease is refreshed and returned as is. Otherwise the
    /// requested address is used when it is inside the pool and free, and
    /// failing that the lowest free address in the range.
    pub fn allocate(&self, mac: &str, requested: Option<Ipv4Addr>) -> Result<Ipv4Addr, PoolError> {
        let mac = normalize_mac(mac);
        let expires_at = self.expiry_from(Utc::now());
        let mut table = self.table();

        if let Some(existing) = table.leases.get_mut(&mac) {
            existing.expires_at = expires_at;
            return Ok(existing.ip);
        }

        if let Some(ip) = requested.filter(|ip| !ip.is_unspecified()) {
            if self.contains(ip) && !table.allocated.contains_key(&ip) {
                return Ok(table.bind(mac, ip, expires_at));
            }
        }

        let free = (self.start..=self.end)
            .map(Ipv4Addr::from)
            .find(|candidate| !table.allocated.contains_key(candidate));

        match free {
            Some(ip) => Ok(table.bind(mac, ip, expires_at)),
            None => Err(PoolError::PoolExhausted),
        }
    }

    /// Release whatever lease owns `ip`.
    pub fn release(&self, ip: Ipv4Addr) -> Result<(), PoolError> {
        let mut table = self.table();
        let mac = table
            .allocated
            .remove(&ip)
            .ok_or(PoolError::NotAllocated(ip))?;
        table.leases.remove(&mac);
        Ok(())
    }

    /// Push the expiry of an existing lease out by one lease duration.
    pub fn renew(&self, mac: &str) -> Result<(), PoolError> {
        let mac = normalize_mac(mac);
        let expires_at = self.expiry_from(Utc::now());
        let mut table = self.table();
        let lease = table
            .leases
            .get_mut(&mac)
            .ok_or(PoolError::LeaseNotFound(mac.clone()))?;
        lease.expires_at = expires_at;
        Ok(())
    }

    /// Address currently leased to `mac`.
    pub fn get_lease(&self, mac: &str) -> Result<Ipv4Addr, PoolError> {
        self.get_lease_at(mac, Utc::now())
    }

    fn get_lease_at(&self, mac: &str, now: DateTime<Utc>) -> Result<Ipv4Addr, PoolError> {
        let mac = normalize_mac(mac);
        let table = self.table();
        let lease = table
            .leases
            .get(&mac)
            .ok_or_else(|| PoolError::LeaseNotFound(mac.clone()))?;
        if lease.is_expired_at(now) {
            return Err(PoolError::LeaseExpired(mac));
        }
        Ok(lease.ip)
    }

    /// Snapshot of all leases, ordered by address.
    pub fn leases(&self) -> Vec<Lease> {
        let mut leases: Vec<Lease> = self.table().leases.values().cloned().collect();
        leases.sort_by_key(|lease| u32::from(lease.ip));
        leases
    }

    /// Whether `ip` lies within `[start, end]`.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        ip >= self.start && ip <= self.end
    }

    pub fn start(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.start)
    }

    pub fn end(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.end)
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.netmask
    }

    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
    }

    pub fn dns_servers(&self) -> &[Ipv4Addr] {
        &self.dns
    }

    /// Lease duration in seconds, as sent in option 51
    pub fn lease_time(&self) -> u32 {
        self.lease_time
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(i64::from(self.lease_time))
    }

    fn table(&self) -> MutexGuard<'_, LeaseTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> LeasePool {
        LeasePool::new(
            &PoolConfig::new("10.0.0.10", "10.0.0.20")
                .with_gateway("10.0.0.1")
                .with_dns("8.8.8.8")
                .with_lease_time(3600),
        )
        .unwrap()
    }

    fn mac(n: u8) -> String {
        format!("00:11:22:33:44:{:02x}", n)
    }

    #[test]
    fn test_first_allocation_is_pool_start() {
        let pool = pool();
        let ip = pool.allocate("AA:BB:CC:DD:EE:FF", None).unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 10));
    }

    #[test]
    fn test_reallocation_is_idempotent() {
        let pool = pool();
        let first = pool.allocate("AA:BB:CC:DD:EE:FF", None).unwrap();
        let second = pool
            .allocate("aabb.ccdd.eeff", Some(Ipv4Addr::new(10, 0, 0, 15)))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.get_lease("aabbccddeeff").unwrap(), first);
        assert_eq!(pool.leases().len(), 1);
    }

    #[test]
    fn test_requested_ip_honoured_when_free() {
        let pool = pool();
        let ip = pool
            .allocate(&mac(1), Some(Ipv4Addr::new(10, 0, 0, 15)))
            .unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 15));

        // taken: fall back to the scan
        let ip = pool
            .allocate(&mac(2), Some(Ipv4Addr::new(10, 0, 0, 15)))
            .unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 10));
    }

    #[test]
    fn test_requested_ip_outside_pool_ignored() {
        let pool = pool();
        let ip = pool
            .allocate(&mac(1), Some(Ipv4Addr::new(192, 168, 1, 50)))
            .unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 10));

        let ip = pool
            .allocate(&mac(2), Some(Ipv4Addr::UNSPECIFIED))
            .unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 11));
    }

    #[test]
    fn test_pool_exhaustion() {
        let pool = pool();
        for n in 0..11 {
            let ip = pool.allocate(&mac(n), None).unwrap();
            assert!(pool.contains(ip));
        }
        assert_eq!(pool.allocate(&mac(11), None), Err(PoolError::PoolExhausted));

        // an existing holder still gets its address back
        assert_eq!(
            pool.allocate(&mac(0), None).unwrap(),
            Ipv4Addr::new(10, 0, 0, 10)
        );
    }

    #[test]
    fn test_release_and_reallocate() {
        let pool = pool();
        let unowned = Ipv4Addr::new(10, 0, 0, 12);
        assert_eq!(pool.release(unowned), Err(PoolError::NotAllocated(unowned)));

        let ip = pool.allocate(&mac(1), None).unwrap();
        pool.release(ip).unwrap();
        assert_eq!(
            pool.get_lease(&mac(1)),
            Err(PoolError::LeaseNotFound(normalize_mac(&mac(1))))
        );

        let again = pool.allocate(&mac(2), Some(ip)).unwrap();
        assert_eq!(again, ip);
        assert_eq!(pool.release(ip), Ok(()));
        assert_eq!(pool.release(ip), Err(PoolError::NotAllocated(ip)));
    }

    #[test]
    fn test_renew() {
        let pool = pool();
        assert!(matches!(
            pool.renew(&mac(1)),
            Err(PoolError::LeaseNotFound(_))
        ));

        pool.allocate(&mac(1), None).unwrap();
        let before = pool.leases()[0].expires_at;
        pool.renew(&mac(1)).unwrap();
        assert!(pool.leases()[0].expires_at >= before);
    }

    #[test]
    fn test_expired_lease_reported_but_not_reclaimed() {
        let pool = pool();
        let ip = pool.allocate(&mac(1), None).unwrap();

        let later = Utc::now() + Duration::seconds(7200);
        assert_eq!(
            pool.get_lease_at(&mac(1), later),
            Err(PoolError::LeaseExpired(normalize_mac(&mac(1))))
        );

        // address still bound to the expired holder
        let other = pool.allocate(&mac(2), Some(ip)).unwrap();
        assert_ne!(other, ip);
        assert_eq!(pool.leases().len(), 2);
    }

    #[test]
    fn test_construction_errors() {
        let base = PoolConfig::new("10.0.0.10", "10.0.0.20");

        let mut bad = base.clone();
        bad.start = "10.0.0".to_string();
        assert!(matches!(LeasePool::new(&bad), Err(PoolError::InvalidPoolBounds(_))));

        let mut bad = base.clone();
        bad.end = "nope".to_string();
        assert!(matches!(LeasePool::new(&bad), Err(PoolError::InvalidPoolBounds(_))));

        let bad = PoolConfig::new("10.0.0.20", "10.0.0.10");
        assert!(matches!(LeasePool::new(&bad), Err(PoolError::InvalidPoolBounds(_))));

        let bad = base.clone().with_netmask("255.255.255");
        assert!(matches!(LeasePool::new(&bad), Err(PoolError::InvalidNetmask(_))));

        let bad = base.clone().with_gateway("gateway");
        assert!(matches!(LeasePool::new(&bad), Err(PoolError::InvalidGateway(_))));

        let bad = base.clone().with_dns("8.8.8.8").with_dns("dns.example");
        assert_eq!(
            LeasePool::new(&bad).unwrap_err(),
            PoolError::InvalidDns("dns.example".to_string())
        );

        // empty gateway means none
        let ok = LeasePool::new(&base.clone().with_gateway("")).unwrap();
        assert_eq!(ok.gateway(), None);

        let ok = LeasePool::new(&base.with_dns("2001:4860:4860::8888").with_dns("1.1.1.1")).unwrap();
        assert_eq!(ok.dns_servers(), &[Ipv4Addr::new(1, 1, 1, 1)]);
    }

    #[test]
    fn test_concurrent_allocation_keeps_index_consistent() {
        use std::sync::Arc;

        let pool = Arc::new(pool());
        let handles: Vec<_> = (0..11)
            .map(|n| {
                let pool = pool.clone();
                std::thread::spawn(move || pool.allocate(&mac(n), None).unwrap())
            })
            .collect();

        let mut ips: Vec<Ipv4Addr> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ips.sort();
        ips.dedup();
        assert_eq!(ips.len(), 11);
    }
}
