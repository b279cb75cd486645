use std::time::{Duration, Instant};

use harvest_core::{
    instant_after, parse_directives, DenyReason, DirectiveSet, HostPolicy, PolicyLimits, MAX_CRAWL_DELAY,
};

fn limits() -> PolicyLimits {
    PolicyLimits {
        default_crawl_delay: Duration::from_secs(2),
        budget_capacity: 100,
        budget_window: Duration::from_secs(3600),
        directive_ttl: Duration::from_secs(60),
    }
}

#[test]
fn consecutive_reservations_respect_crawl_delay() {
    let start = Instant::now();
    let mut policy = HostPolicy::new(DirectiveSet::allow_all(), &limits(), start);

    assert_eq!(policy.check_and_reserve("/a", start, Duration::ZERO), Ok(()));
    policy.record_fetch(start);

    let early = start + Duration::from_millis(500);
    assert_eq!(
        policy.check_and_reserve("/b", early, Duration::ZERO),
        Err(DenyReason::TooSoon {
            wait: Duration::from_millis(1500)
        })
    );

    let on_time = start + Duration::from_secs(2);
    assert_eq!(policy.check_and_reserve("/b", on_time, Duration::ZERO), Ok(()));
    assert_eq!(policy.last_fetch(), Some(on_time));
}

#[test]
fn record_fetch_moves_spacing_to_actual_send_time() {
    let start = Instant::now();
    let mut policy = HostPolicy::new(DirectiveSet::allow_all(), &limits(), start);
    policy.check_and_reserve("/", start, Duration::ZERO).unwrap();

    let sent = start + Duration::from_millis(300);
    policy.record_fetch(sent);
    assert_eq!(policy.fetch_count(), 1);
    assert_eq!(policy.next_allowed_at(), Some(sent + Duration::from_secs(2)));
}

#[test]
fn robots_crawl_delay_above_default_wins() {
    let start = Instant::now();
    let directives = parse_directives("User-agent: *\nCrawl-delay: 5\n", "harvestbot");
    let policy = HostPolicy::new(directives, &limits(), start);
    assert_eq!(policy.crawl_delay(), Duration::from_secs(5));

    let directives = parse_directives("User-agent: *\nCrawl-delay: 0.5\n", "harvestbot");
    let policy = HostPolicy::new(directives, &limits(), start);
    assert_eq!(policy.crawl_delay(), Duration::from_secs(2));
}

#[test]
fn disallowed_path_is_denied_without_consuming_budget() {
    let start = Instant::now();
    let directives = parse_directives("User-agent: *\nDisallow: /private\n", "harvestbot");
    let mut policy = HostPolicy::new(directives, &limits(), start);

    assert_eq!(
        policy.check_and_reserve("/private/x", start, Duration::ZERO),
        Err(DenyReason::Disallowed)
    );
    assert_eq!(policy.last_fetch(), None);
    assert!((policy.tokens(start) - 100.0).abs() < 1e-9);
}

#[test]
fn exhausted_budget_reports_refill_wait() {
    let start = Instant::now();
    let limits = PolicyLimits {
        default_crawl_delay: Duration::ZERO,
        budget_capacity: 2,
        budget_window: Duration::from_secs(20),
        ..limits()
    };
    let mut policy = HostPolicy::new(DirectiveSet::allow_all(), &limits, start);
    policy.check_and_reserve("/", start, Duration::ZERO).unwrap();
    policy.check_and_reserve("/", start, Duration::ZERO).unwrap();

    match policy.check_and_reserve("/", start, Duration::ZERO) {
        Err(DenyReason::RateLimited { retry_after }) => {
            assert!((retry_after.as_secs_f64() - 10.0).abs() < 1e-6, "{retry_after:?}");
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[test]
fn extra_spacing_delays_the_following_reservation() {
    let start = Instant::now();
    let mut policy = HostPolicy::new(DirectiveSet::allow_all(), &limits(), start);
    policy
        .check_and_reserve("/", start, Duration::from_millis(700))
        .unwrap();

    let after_delay = start + Duration::from_secs(2);
    assert!(policy
        .check_and_reserve("/", after_delay, Duration::ZERO)
        .is_err());
    let after_extra = start + Duration::from_millis(2700);
    assert!(policy
        .check_and_reserve("/", after_extra, Duration::ZERO)
        .is_ok());
}

#[test]
fn directives_expire_after_ttl_and_refresh_keeps_spacing() {
    let start = Instant::now();
    let mut policy = HostPolicy::new(DirectiveSet::allow_all(), &limits(), start);
    policy.check_and_reserve("/", start, Duration::ZERO).unwrap();
    assert!(!policy.directives_expired(start + Duration::from_secs(59)));

    let later = start + Duration::from_secs(60);
    assert!(policy.directives_expired(later));

    let stricter = parse_directives("User-agent: *\nDisallow: /\n", "harvestbot");
    policy.refresh_directives(stricter, &limits(), later);
    assert!(!policy.directives_expired(later));
    assert_eq!(policy.last_fetch(), Some(start));
    assert_eq!(
        policy.check_and_reserve("/x", later, Duration::ZERO),
        Err(DenyReason::Disallowed)
    );
}

#[test]
fn hostile_crawl_delay_is_capped_and_never_overflows() {
    let start = Instant::now();
    let directives = parse_directives("User-agent: *\nCrawl-delay: 1e19\n", "harvestbot");
    let mut policy = HostPolicy::new(directives, &limits(), start);
    assert_eq!(policy.crawl_delay(), MAX_CRAWL_DELAY);

    assert_eq!(policy.check_and_reserve("/a", start, Duration::ZERO), Ok(()));
    policy.record_fetch(start);
    assert_eq!(
        policy.check_and_reserve("/b", start, Duration::ZERO),
        Err(DenyReason::TooSoon {
            wait: MAX_CRAWL_DELAY
        })
    );
}

#[test]
fn next_allowed_at_saturates_for_unbounded_delays() {
    let start = Instant::now();
    let directives = DirectiveSet {
        crawl_delay: Some(Duration::MAX),
        ..DirectiveSet::allow_all()
    };
    let mut policy = HostPolicy::new(directives, &limits(), start);
    policy.check_and_reserve("/a", start, Duration::MAX).unwrap();

    let earliest = policy.next_allowed_at().unwrap();
    assert!(earliest > start + MAX_CRAWL_DELAY);
    assert!(matches!(
        policy.check_and_reserve("/b", start + Duration::from_secs(1), Duration::ZERO),
        Err(DenyReason::TooSoon { .. })
    ));
    assert_eq!(instant_after(start, Duration::MAX), policy.next_allowed_at().unwrap());
}
