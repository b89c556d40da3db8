use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use super::*;
use crate::protocol::{Header, Opcode, Plan};
use crate::registry::DiskState;

const USER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

fn user_src() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(USER_IP), 40000)
}

fn coordinator() -> Coordinator {
    let mut c = Coordinator::new(&CoordinatorConfig {
        seed: Some(42),
        ..CoordinatorConfig::default()
    });
    admit_users(&mut c, &["alice", "bob"]);
    c
}

/// Registers users from `user_src()` without touching the request counters.
fn admit_users(c: &mut Coordinator, names: &[&str]) {
    for name in names {
        let admitted = (0..64u16).map(|i| 15900 + 2 * i).any(|port| {
            c.registry
                .register_user(name, user_src(), PortPair::new(port, port + 1))
                .is_ok()
        });
        assert!(admitted, "no free port pair for {name}");
    }
}

fn status_of(reply: &Reply) -> Status {
    reply.status()
}

fn expect_ok(reply: Reply) {
    assert_eq!(reply.status(), Status::Ok, "{reply:?}");
}

fn register_disks(c: &mut Coordinator, count: u8) {
    for i in 0..count {
        let source = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 2, i)), 9);
        let port = 16000 + 2 * u16::from(i);
        expect_ok(c.dispatch(
            Request::RegisterDisk {
                name: format!("d{i}"),
                capacity_blocks: 1024,
                m_port: port,
                c_port: port + 1,
            },
            source,
        ));
    }
}

fn configure(c: &mut Coordinator, dss: &str, n: u32) -> Reply {
    c.dispatch(
        Request::ConfigureDss {
            dss: dss.into(),
            n,
            striping_unit: 1024,
        },
        user_src(),
    )
}

fn copy(c: &mut Coordinator, dss: &str, file: &str, size: u32, owner: &str) -> (Reply, Reply) {
    let req = CopyRequest {
        dss: dss.into(),
        file: file.into(),
        size,
        owner: owner.into(),
    };
    let begin = c.dispatch(Request::CopyBegin(req.clone()), user_src());
    let complete = c.dispatch(Request::CopyComplete(req), user_src());
    (begin, complete)
}

fn read_req(dss: &str, file: &str, user: &str) -> ReadRequest {
    ReadRequest {
        dss: dss.into(),
        file: file.into(),
        user: user.into(),
    }
}

fn listing(c: &mut Coordinator) -> String {
    match c.dispatch(Request::Ls, user_src()) {
        Reply::Listing(text) => text,
        other => panic!("expected listing, got {other:?}"),
    }
}

fn plan_of(reply: Reply) -> Plan {
    match reply {
        Reply::CopyPlan(plan) | Reply::FailPlan(plan) | Reply::DecomPlan(plan) => plan,
        Reply::ReadPlan(read) => read.plan,
        other => panic!("expected a plan, got {other:?}"),
    }
}

/// Every IN_DSS disk belongs to exactly one array, and every member is IN_DSS.
fn assert_disk_states_consistent(c: &Coordinator) {
    let members: HashSet<_> = c
        .directory()
        .arrays()
        .flat_map(|a| a.members.iter().copied())
        .collect();
    for disk in c.registry().disks() {
        assert_eq!(
            disk.state == DiskState::InDss,
            members.contains(&disk.id),
            "disk {} state {:?}",
            disk.name,
            disk.state
        );
    }
}

#[test]
fn configure_takes_exactly_n_free_disks() {
    let mut c = coordinator();
    register_disks(&mut c, 3);

    expect_ok(configure(&mut c, "A", 3));
    assert_eq!(c.registry().count_free_disks(), 0);
    let array = c.directory().get("A").unwrap();
    let unique: HashSet<_> = array.members.iter().collect();
    assert_eq!(unique.len(), 3);
    assert_disk_states_consistent(&c);

    let reply = configure(&mut c, "B", 3);
    assert_eq!(status_of(&reply), Status::InsufficientDisks);
    assert!(c.directory().get("B").is_none());
}

#[test]
fn configure_rejections_leave_no_trace() {
    let mut c = coordinator();
    register_disks(&mut c, 5);

    assert_eq!(status_of(&configure(&mut c, "A", 2)), Status::BadParams);
    assert_eq!(
        status_of(&c.dispatch(
            Request::ConfigureDss {
                dss: "A".into(),
                n: 3,
                striping_unit: 3000,
            },
            user_src(),
        )),
        Status::BadParams
    );
    assert_eq!(status_of(&configure(&mut c, "A", 6)), Status::InsufficientDisks);
    assert!(c.directory().is_empty());
    assert_eq!(c.registry().count_free_disks(), 5);

    expect_ok(configure(&mut c, "A", 3));
    assert_eq!(status_of(&configure(&mut c, "A", 3)), Status::BadParams);
    assert_eq!(c.registry().count_free_disks(), 2);
}

#[test]
fn full_array_table_is_internal() {
    let mut c = Coordinator::new(&CoordinatorConfig {
        max_arrays: 1,
        seed: Some(1),
        ..CoordinatorConfig::default()
    });
    register_disks(&mut c, 6);
    expect_ok(configure(&mut c, "A", 3));
    assert_eq!(status_of(&configure(&mut c, "B", 3)), Status::Internal);
    assert_eq!(c.registry().count_free_disks(), 3);
    assert_disk_states_consistent(&c);
}

#[test]
fn copy_then_list_shows_the_file() {
    let mut c = coordinator();
    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));

    let (begin, complete) = copy(&mut c, "A", "f", 100, "alice");
    let plan = plan_of(begin);
    assert_eq!(plan.n(), 3);
    assert_eq!(plan.striping_unit, 1024);
    expect_ok(complete);

    let text = listing(&mut c);
    assert!(text.starts_with("A: n=3 disks=["), "{text}");
    assert!(text.contains("state=active"), "{text}");
    assert!(text.contains("  f 100 B alice\n"), "{text}");
}

#[test]
fn empty_dss_name_targets_the_first_array() {
    let mut c = coordinator();
    register_disks(&mut c, 6);
    expect_ok(configure(&mut c, "A", 3));
    expect_ok(configure(&mut c, "B", 3));

    let (begin, complete) = copy(&mut c, "", "f", 10, "alice");
    assert_eq!(plan_of(begin).dss_name, "A");
    expect_ok(complete);
    assert!(c.directory().find_file("A", "f").is_some());
    assert!(c.directory().find_file("B", "f").is_none());
}

#[test]
fn copy_validation() {
    let mut c = coordinator();
    let (begin, complete) = copy(&mut c, "", "f", 1, "alice");
    assert_eq!(begin.status(), Status::BadParams);
    assert_eq!(complete.status(), Status::BadParams);

    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));
    let (begin, _) = copy(&mut c, "Z", "f", 1, "alice");
    assert_eq!(begin.status(), Status::BadParams);
    let (begin, _) = copy(&mut c, "A", "", 1, "alice");
    assert_eq!(begin.status(), Status::BadParams);
}

#[test]
fn repeated_copy_complete_adds_another_entry() {
    let mut c = coordinator();
    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));
    let (_, first) = copy(&mut c, "A", "f", 100, "alice");
    let (_, second) = copy(&mut c, "A", "f", 100, "alice");
    expect_ok(first);
    expect_ok(second);
    copy(&mut c, "A", "f", 250, "bob");

    let text = listing(&mut c);
    assert_eq!(text.matches("  f 100 B alice\n").count(), 2, "{text}");
    assert!(text.contains("  f 250 B bob\n"), "{text}");
    assert_eq!(c.directory().files_of("A").count(), 3);
    assert_eq!(c.directory().find_file("A", "f").unwrap().owner, "alice");
}

#[test]
fn repeated_copy_complete_fills_the_file_table() {
    let mut c = Coordinator::new(&CoordinatorConfig {
        max_files: 1,
        seed: Some(2),
        ..CoordinatorConfig::default()
    });
    admit_users(&mut c, &["alice"]);
    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));

    let (_, complete) = copy(&mut c, "A", "f", 1, "alice");
    expect_ok(complete);
    let (begin, complete) = copy(&mut c, "A", "f", 1, "alice");
    plan_of(begin);
    assert_eq!(complete.status(), Status::Internal);
}

#[test]
fn read_enforces_ownership_and_tracks_sessions() {
    let mut c = coordinator();
    admit_users(&mut c, &["ali", "alicex"]);
    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));
    copy(&mut c, "A", "f", 100, "alice");

    let reply = c.dispatch(Request::ReadBegin(read_req("A", "f", "bob")), user_src());
    assert_eq!(reply.status(), Status::NotOwner);
    let reply = c.dispatch(Request::ReadBegin(read_req("A", "f", "ali")), user_src());
    assert_eq!(reply.status(), Status::NotOwner);
    let reply = c.dispatch(Request::ReadBegin(read_req("A", "f", "alicex")), user_src());
    assert_eq!(reply.status(), Status::NotOwner);
    assert_eq!(c.directory().session_count(), 0);

    match c.dispatch(Request::ReadBegin(read_req("A", "f", "alice")), user_src()) {
        Reply::ReadPlan(read) => {
            assert_eq!(read.file_name, "f");
            assert_eq!(read.file_size, 100);
            assert_eq!(read.plan.n(), 3);
        }
        other => panic!("expected read plan, got {other:?}"),
    }
    assert!(c.directory().has_sessions("A"));

    expect_ok(c.dispatch(Request::ReadComplete(read_req("A", "f", "alice")), user_src()));
    assert!(!c.directory().has_sessions("A"));
    expect_ok(c.dispatch(Request::ReadComplete(read_req("A", "f", "alice")), user_src()));
}

#[test]
fn read_rejections_in_order() {
    let mut c = coordinator();
    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));

    let reply = c.dispatch(Request::ReadBegin(read_req("Z", "f", "alice")), user_src());
    assert_eq!(reply.status(), Status::BadParams);
    let reply = c.dispatch(Request::ReadBegin(read_req("A", "f", "alice")), user_src());
    assert_eq!(reply.status(), Status::NotFound);

    let mut limited = Coordinator::new(&CoordinatorConfig {
        max_read_sessions: 0,
        seed: Some(3),
        ..CoordinatorConfig::default()
    });
    admit_users(&mut limited, &["alice"]);
    register_disks(&mut limited, 3);
    expect_ok(configure(&mut limited, "A", 3));
    copy(&mut limited, "A", "f", 1, "alice");
    let reply = limited.dispatch(Request::ReadBegin(read_req("A", "f", "alice")), user_src());
    assert_eq!(reply.status(), Status::Internal);
}

#[test]
fn maintenance_blocks_only_its_array() {
    let mut c = coordinator();
    register_disks(&mut c, 6);
    expect_ok(configure(&mut c, "A", 3));
    expect_ok(configure(&mut c, "B", 3));
    copy(&mut c, "A", "f", 1, "alice");
    copy(&mut c, "B", "g", 1, "alice");

    let plan = plan_of(c.dispatch(
        Request::FailBegin {
            dss: "A".into(),
            disk: String::new(),
        },
        user_src(),
    ));
    assert_eq!(plan.failed_mask, 0);

    let (begin, complete) = copy(&mut c, "A", "h", 1, "alice");
    assert_eq!(begin.status(), Status::Busy);
    assert_eq!(complete.status(), Status::Busy);
    let reply = c.dispatch(Request::ReadBegin(read_req("A", "f", "alice")), user_src());
    assert_eq!(reply.status(), Status::Busy);
    let reply = c.dispatch(
        Request::FailBegin {
            dss: "A".into(),
            disk: String::new(),
        },
        user_src(),
    );
    assert_eq!(reply.status(), Status::Busy);
    let reply = c.dispatch(Request::DecomBegin { dss: "A".into() }, user_src());
    assert_eq!(reply.status(), Status::Busy);

    let (begin, complete) = copy(&mut c, "B", "h", 1, "alice");
    plan_of(begin);
    expect_ok(complete);
    let reply = c.dispatch(Request::ReadBegin(read_req("B", "g", "alice")), user_src());
    plan_of(reply);

    expect_ok(c.dispatch(Request::RecoveryComplete { dss: "A".into() }, user_src()));
    let (begin, _) = copy(&mut c, "A", "h", 1, "alice");
    plan_of(begin);
}

#[test]
fn fail_begin_marks_the_named_member() {
    let mut c = coordinator();
    register_disks(&mut c, 4);
    expect_ok(configure(&mut c, "A", 3));
    let members = c.directory().get("A").unwrap().members.clone();
    let victim = c.registry().disk(members[1]).unwrap().name.clone();
    let outsider = c
        .registry()
        .disks()
        .find(|d| d.state == DiskState::Free)
        .unwrap()
        .name
        .clone();

    let reply = c.dispatch(
        Request::FailBegin {
            dss: "A".into(),
            disk: outsider,
        },
        user_src(),
    );
    assert_eq!(reply.status(), Status::BadParams);
    assert!(!c.directory().get("A").unwrap().state.is_critical());

    let plan = plan_of(c.dispatch(
        Request::FailBegin {
            dss: "A".into(),
            disk: victim,
        },
        user_src(),
    ));
    assert_eq!(plan.failed_mask, 0b010);
    assert!(plan.is_failed(1));
    assert!(c.directory().get("A").unwrap().state.is_critical());

    expect_ok(c.dispatch(Request::RecoveryComplete { dss: "A".into() }, user_src()));
    let array = c.directory().get("A").unwrap();
    assert_eq!(array.failed_mask, 0);
    assert!(!array.state.is_critical());
}

#[test]
fn active_reads_refuse_maintenance() {
    let mut c = coordinator();
    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));
    copy(&mut c, "A", "f", 1, "alice");
    plan_of(c.dispatch(Request::ReadBegin(read_req("A", "f", "alice")), user_src()));

    let reply = c.dispatch(
        Request::FailBegin {
            dss: "A".into(),
            disk: String::new(),
        },
        user_src(),
    );
    assert_eq!(reply.status(), Status::BadParams);
    let reply = c.dispatch(Request::DecomBegin { dss: "A".into() }, user_src());
    assert_eq!(reply.status(), Status::BadParams);
    assert!(!c.directory().get("A").unwrap().state.is_critical());

    expect_ok(c.dispatch(Request::ReadComplete(read_req("A", "f", "alice")), user_src()));
    plan_of(c.dispatch(Request::DecomBegin { dss: "A".into() }, user_src()));
}

#[test]
fn decommission_frees_disks_for_reuse() {
    let mut c = coordinator();
    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));
    copy(&mut c, "A", "f", 1, "alice");

    let plan = plan_of(c.dispatch(Request::DecomBegin { dss: "A".into() }, user_src()));
    assert_eq!(plan.n(), 3);
    expect_ok(c.dispatch(Request::DecomComplete { dss: "A".into() }, user_src()));

    assert!(c.directory().get("A").is_none());
    assert!(c.directory().find_file("A", "f").is_none());
    assert_eq!(c.registry().count_free_disks(), 3);
    assert_disk_states_consistent(&c);

    let reply = c.dispatch(Request::DecomComplete { dss: "A".into() }, user_src());
    assert_eq!(reply.status(), Status::BadParams);
    let reply = c.dispatch(Request::RecoveryComplete { dss: "A".into() }, user_src());
    assert_eq!(reply.status(), Status::BadParams);

    expect_ok(configure(&mut c, "A2", 3));
    assert_disk_states_consistent(&c);
}

#[test]
fn decommission_complete_drops_open_read_sessions() {
    let mut c = coordinator();
    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));
    copy(&mut c, "A", "f", 1, "alice");
    plan_of(c.dispatch(Request::ReadBegin(read_req("A", "f", "alice")), user_src()));

    expect_ok(c.dispatch(Request::DecomComplete { dss: "A".into() }, user_src()));
    assert_eq!(c.directory().session_count(), 0);

    expect_ok(configure(&mut c, "A", 3));
    assert!(!c.directory().has_sessions("A"));
    let plan = plan_of(c.dispatch(
        Request::FailBegin {
            dss: "A".into(),
            disk: String::new(),
        },
        user_src(),
    ));
    assert_eq!(plan.dss_name, "A");
}

#[test]
fn member_disks_cannot_be_deregistered() {
    let mut c = coordinator();
    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));

    let reply = c.dispatch(Request::DeregisterDisk { name: "d0".into() }, user_src());
    assert_eq!(reply.status(), Status::BadParams);

    plan_of(c.dispatch(Request::DecomBegin { dss: "A".into() }, user_src()));
    expect_ok(c.dispatch(Request::DecomComplete { dss: "A".into() }, user_src()));
    expect_ok(c.dispatch(Request::DeregisterDisk { name: "d0".into() }, user_src()));
}

#[test]
fn unmatched_begin_holds_the_array() {
    let mut c = coordinator();
    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));
    copy(&mut c, "A", "f", 1, "alice");

    plan_of(c.dispatch(Request::ReadBegin(read_req("A", "f", "alice")), user_src()));
    for _ in 0..3 {
        let reply = c.dispatch(Request::DecomBegin { dss: "A".into() }, user_src());
        assert_eq!(reply.status(), Status::BadParams);
    }

    expect_ok(c.dispatch(Request::ReadComplete(read_req("A", "f", "alice")), user_src()));
    plan_of(c.dispatch(Request::DecomBegin { dss: "A".into() }, user_src()));
    for _ in 0..3 {
        let (begin, _) = copy(&mut c, "A", "g", 1, "alice");
        assert_eq!(begin.status(), Status::Busy);
    }
}

#[test]
fn ls_without_arrays_is_bad_params() {
    let mut c = coordinator();
    assert_eq!(c.dispatch(Request::Ls, user_src()).status(), Status::BadParams);
}

#[test]
fn unregistered_callers_are_refused_by_default() {
    let mut c = Coordinator::new(&CoordinatorConfig {
        seed: Some(5),
        ..CoordinatorConfig::default()
    });
    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));

    let (begin, complete) = copy(&mut c, "A", "f", 1, "alice");
    assert_eq!(begin.status(), Status::NotRegistered);
    assert_eq!(complete.status(), Status::NotRegistered);
    assert!(c.directory().find_file("A", "f").is_none());

    expect_ok(c.dispatch(
        Request::RegisterUser {
            name: "alice".into(),
            m_port: 15901,
            c_port: 15902,
        },
        user_src(),
    ));
    let (begin, complete) = copy(&mut c, "A", "f", 1, "alice");
    plan_of(begin);
    expect_ok(complete);
    plan_of(c.dispatch(Request::ReadBegin(read_req("A", "f", "alice")), user_src()));

    let elsewhere = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 9, 9, 9)), 40000);
    let reply = c.dispatch(Request::ReadBegin(read_req("A", "f", "alice")), elsewhere);
    assert_eq!(reply.status(), Status::NotRegistered);
    let reply = c.dispatch(Request::ReadBegin(read_req("A", "f", "mallory")), user_src());
    assert_eq!(reply.status(), Status::NotRegistered);
}

#[test]
fn allow_unregistered_compares_names_only() {
    let mut c = Coordinator::new(&CoordinatorConfig {
        allow_unregistered: true,
        seed: Some(5),
        ..CoordinatorConfig::default()
    });
    register_disks(&mut c, 3);
    expect_ok(configure(&mut c, "A", 3));

    let (begin, complete) = copy(&mut c, "A", "f", 1, "alice");
    plan_of(begin);
    expect_ok(complete);
    plan_of(c.dispatch(Request::ReadBegin(read_req("A", "f", "alice")), user_src()));
    let reply = c.dispatch(Request::ReadBegin(read_req("A", "f", "bob")), user_src());
    assert_eq!(reply.status(), Status::NotOwner);
}

#[test]
fn datagrams_round_trip_with_request_id() {
    let mut c = coordinator();
    let request = Request::RegisterDisk {
        name: "d0".into(),
        capacity_blocks: 8,
        m_port: 16000,
        c_port: 16001,
    };
    let out = c
        .handle_datagram(&request.to_datagram(0xABCD), user_src())
        .expect("reply");
    let (header, payload) = split_datagram(&out).unwrap();
    assert_eq!(header.req_id, 0xABCD);
    assert_eq!(header.opcode().unwrap(), Opcode::Ack);
    assert_eq!(
        Reply::decode(Opcode::Ack, payload).unwrap().status(),
        Status::Ok
    );

    let out = c
        .handle_datagram(&request.to_datagram(7), user_src())
        .expect("reply");
    let (header, _) = split_datagram(&out).unwrap();
    assert_eq!(header.opcode().unwrap(), Opcode::Err);
    assert_eq!(c.stats().served, 1);
    assert_eq!(c.stats().rejected, 1);
}

#[test]
fn malformed_datagrams() {
    let mut c = coordinator();
    assert!(c.handle_datagram(&[1, 2, 3], user_src()).is_none());
    assert_eq!(c.stats().dropped, 1);

    let mut unknown = Header::new(Opcode::Ls, 11).to_bytes().to_vec();
    unknown[1] = 99;
    let out = c.handle_datagram(&unknown, user_src()).expect("reply");
    let (header, payload) = split_datagram(&out).unwrap();
    assert_eq!(header.req_id, 11);
    assert_eq!(
        Reply::decode(header.opcode().unwrap(), payload)
            .unwrap()
            .status(),
        Status::BadParams
    );

    let truncated = &Request::DecomBegin { dss: "A".into() }.to_datagram(12)[..10];
    let out = c.handle_datagram(truncated, user_src()).expect("reply");
    let (header, _) = split_datagram(&out).unwrap();
    assert_eq!(header.opcode().unwrap(), Opcode::Err);
    assert_eq!(c.stats().malformed, 2);
    assert!(c.registry().disks().next().is_none());
}

#[test]
fn seeded_coordinators_place_identically() {
    let placements: Vec<Vec<String>> = (0..2)
        .map(|_| {
            let mut c = coordinator();
            register_disks(&mut c, 8);
            expect_ok(configure(&mut c, "A", 4));
            let array = c.directory().get("A").unwrap();
            array
                .members
                .iter()
                .map(|id| c.registry().disk(*id).unwrap().name.clone())
                .collect()
        })
        .collect();
    assert_eq!(placements[0], placements[1]);
}
