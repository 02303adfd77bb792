use forkos_abi::memlayout::{PFTEMP, PROCESS_CODE_START_VA, USTACK_PAGE, UXSTACK_BASE};
use forkos_abi::syscall::SYS_PAGE_MAP;
use forkos_abi::trap::{FEC_PR, FEC_U, FEC_WR};
use forkos_abi::{EnvId, EnvStatus, KernError, UTrapframe, VirtAddr};
use forkos_mm::{PageFlags, PageTableLevel, PageWalk};
use forkos_userland::{
    CowFaultError, ForkError, ForkResult, duppage, fork, handle_upcall, pgfault,
    set_pgfault_handler, sfork,
};

use crate::machine::{Sim, StoreError, UPCALL_ENTRY, UserEnv};

const DATA: VirtAddr = VirtAddr(0x0040_1000);
const SHARED: VirtAddr = VirtAddr(0x0040_2000);
const HIGH: VirtAddr = VirtAddr(0x0000_2000_0000_0000);

const COW_RO: PageFlags = PageFlags::USER_RO.union(PageFlags::COW);

fn parent_with_data() -> (Sim, EnvId) {
    let mut sim = Sim::new();
    let parent = sim.boot_env();
    sim.kernel.map_test_page(parent, DATA, PageFlags::USER_RW);
    sim.store(DATA, 1).unwrap();
    (sim, parent)
}

fn fork_child(sim: &mut Sim) -> EnvId {
    match fork(&mut sim.user()) {
        Ok(ForkResult::Parent { child }) => child,
        other => panic!("fork: {:?}", other),
    }
}

fn sfork_child(sim: &mut Sim) -> EnvId {
    match sfork(&mut sim.user()) {
        Ok(ForkResult::Parent { child }) => child,
        other => panic!("sfork: {:?}", other),
    }
}

#[test]
fn fork_marks_writable_pages_cow_in_both() {
    let (mut sim, parent) = parent_with_data();
    let child = fork_child(&mut sim);

    assert_eq!(sim.kernel.flags_of(parent, DATA), Some(COW_RO));
    assert_eq!(sim.kernel.flags_of(child, DATA), Some(COW_RO));
    assert_eq!(sim.kernel.frame_of(parent, DATA), sim.kernel.frame_of(child, DATA));
    assert_eq!(sim.kernel.flags_of(child, USTACK_PAGE), Some(COW_RO));

    let env = sim.kernel.env(child);
    assert_eq!(env.status, EnvStatus::Runnable);
    assert_eq!(env.parent, Some(parent));
    assert_eq!(env.upcall, Some(UPCALL_ENTRY));
}

#[test]
fn parent_write_after_fork_is_private() {
    let (mut sim, parent) = parent_with_data();
    let child = fork_child(&mut sim);
    let shared_frame = sim.kernel.frame_of(child, DATA);

    sim.store(DATA, 2).unwrap();

    assert_eq!(sim.kernel.peek(parent, DATA), Some(2));
    assert_eq!(sim.kernel.peek(child, DATA), Some(1));
    assert_eq!(sim.kernel.flags_of(parent, DATA), Some(PageFlags::USER_RW));
    assert_ne!(sim.kernel.frame_of(parent, DATA), shared_frame);
    assert_eq!(sim.kernel.frame_of(child, DATA), shared_frame);
    assert_eq!(sim.kernel.mapping(parent, PFTEMP), None);
}

#[test]
fn child_write_after_fork_is_private() {
    let (mut sim, parent) = parent_with_data();
    let child = fork_child(&mut sim);

    sim.run(child);
    sim.store(DATA, 3).unwrap();

    assert_eq!(sim.kernel.peek(child, DATA), Some(3));
    assert_eq!(sim.kernel.peek(parent, DATA), Some(1));
    assert_eq!(sim.kernel.flags_of(parent, DATA), Some(COW_RO));
    assert_eq!(sim.kernel.mapping(child, PFTEMP), None);
}

#[test]
fn child_starts_with_its_own_exception_stack() {
    let (mut sim, parent) = parent_with_data();
    let child = fork_child(&mut sim);

    assert_eq!(sim.kernel.flags_of(child, UXSTACK_BASE), Some(PageFlags::USER_RW));
    assert_ne!(
        sim.kernel.frame_of(child, UXSTACK_BASE),
        sim.kernel.frame_of(parent, UXSTACK_BASE)
    );
    assert_eq!(sim.kernel.flags_of(parent, UXSTACK_BASE), Some(PageFlags::USER_RW));
}

#[test]
fn read_only_pages_are_shared_unchanged() {
    let (mut sim, parent) = parent_with_data();
    let child = fork_child(&mut sim);

    let code = PROCESS_CODE_START_VA;
    assert_eq!(sim.kernel.flags_of(parent, code), Some(PageFlags::USER_RO));
    assert_eq!(sim.kernel.flags_of(child, code), Some(PageFlags::USER_RO));
    assert_eq!(sim.kernel.frame_of(parent, code), sim.kernel.frame_of(child, code));
}

#[test]
fn write_to_a_read_only_page_after_fork_kills_only_the_writer() {
    let (mut sim, parent) = parent_with_data();
    let child = fork_child(&mut sim);
    let code = PROCESS_CODE_START_VA;
    let frame = sim.kernel.frame_of(parent, code);

    sim.run(child);
    let err = sim.store(code, 1).unwrap_err();
    assert!(matches!(err, StoreError::Handler(CowFaultError::NotCow { .. })));
    assert!(!sim.kernel.is_live(child));

    assert!(sim.kernel.is_live(parent));
    assert_eq!(sim.kernel.flags_of(parent, code), Some(PageFlags::USER_RO));
    assert_eq!(sim.kernel.frame_of(parent, code), frame);
}

#[test]
fn available_bits_do_not_exempt_a_writable_page_from_cow() {
    let (mut sim, parent) = parent_with_data();
    sim.kernel.map_test_page(parent, SHARED, PageFlags::USER_RW | PageFlags::AVAIL1);
    let child = fork_child(&mut sim);

    let cow = COW_RO | PageFlags::AVAIL1;
    assert_eq!(sim.kernel.flags_of(parent, SHARED), Some(cow));
    assert_eq!(sim.kernel.flags_of(child, SHARED), Some(cow));

    sim.run(child);
    sim.store(SHARED, 7).unwrap();
    assert_eq!(sim.kernel.peek(child, SHARED), Some(7));
    assert_eq!(sim.kernel.peek(parent, SHARED), Some(0));
}

/// No frame mapped by both environments may be writable in one and
/// copy-on-write in the other.
fn assert_no_writable_cow_pair(sim: &Sim, a: EnvId, b: EnvId) {
    for (va, ma) in sim.kernel.mapped_pages(a) {
        let Some(mb) = sim.kernel.mapping(b, va) else {
            continue;
        };
        if ma.frame != mb.frame {
            continue;
        }
        for (x, y) in [(ma.flags, mb.flags), (mb.flags, ma.flags)] {
            assert!(
                !(x.contains(PageFlags::WRITABLE) && y.contains(PageFlags::COW)),
                "{:#x} is writable in one environment and cow in the other",
                va.as_u64()
            );
        }
        assert_eq!(ma.flags, mb.flags, "{:#x} shared with different flags", va.as_u64());
    }
}

#[test]
fn duplicated_pages_are_never_writable_against_cow() {
    let (mut sim, parent) = parent_with_data();
    sim.kernel.map_test_page(parent, SHARED, PageFlags::USER_RW | PageFlags::AVAIL0);
    sim.kernel.map_test_page(parent, HIGH, PageFlags::USER_RW);
    let child = fork_child(&mut sim);
    assert_no_writable_cow_pair(&sim, parent, child);

    sim.store(DATA, 2).unwrap();
    sim.run(child);
    sim.store(HIGH, 3).unwrap();
    assert_no_writable_cow_pair(&sim, parent, child);
    assert_no_writable_cow_pair(&sim, child, parent);
}

#[test]
fn grandchild_of_a_cow_page_stays_cow() {
    let (mut sim, parent) = parent_with_data();
    let child = fork_child(&mut sim);
    sim.run(child);
    let grandchild = fork_child(&mut sim);

    assert_eq!(sim.kernel.flags_of(child, DATA), Some(COW_RO));
    assert_eq!(sim.kernel.flags_of(grandchild, DATA), Some(COW_RO));
    assert_eq!(sim.kernel.env(grandchild).parent, Some(child));

    sim.run(grandchild);
    sim.store(DATA, 9).unwrap();
    assert_eq!(sim.kernel.peek(child, DATA), Some(1));
    assert_eq!(sim.kernel.peek(parent, DATA), Some(1));
}

#[test]
fn sfork_shares_data_but_not_the_stack() {
    let (mut sim, parent) = parent_with_data();
    let child = sfork_child(&mut sim);

    assert_eq!(sim.kernel.flags_of(child, DATA), Some(PageFlags::USER_RW));
    assert_eq!(sim.kernel.flags_of(parent, DATA), Some(PageFlags::USER_RW));
    assert_eq!(sim.kernel.flags_of(parent, USTACK_PAGE), Some(COW_RO));

    sim.store(DATA, 5).unwrap();
    assert_eq!(sim.kernel.peek(child, DATA), Some(5));

    sim.store(USTACK_PAGE, 6).unwrap();
    assert_eq!(sim.kernel.peek(parent, USTACK_PAGE), Some(6));
    assert_eq!(sim.kernel.peek(child, USTACK_PAGE), Some(0));
    assert_eq!(sim.kernel.env(child).status, EnvStatus::Runnable);
}

#[test]
fn sfork_writes_are_seen_by_both_sides() {
    let (mut sim, parent) = parent_with_data();
    let child = sfork_child(&mut sim);
    assert_eq!(sim.kernel.frame_of(parent, DATA), sim.kernel.frame_of(child, DATA));

    sim.store(DATA, 5).unwrap();
    sim.run(child);
    assert_eq!(sim.kernel.peek(child, DATA), Some(5));
    sim.store(DATA.offset(1), 8).unwrap();

    assert_eq!(sim.kernel.peek(parent, DATA.offset(1)), Some(8));
    assert_eq!(sim.kernel.frame_of(parent, DATA), sim.kernel.frame_of(child, DATA));
    assert_eq!(sim.kernel.flags_of(child, DATA), Some(PageFlags::USER_RW));
}

#[test]
fn walk_skips_absent_page_tables() {
    let (mut sim, parent) = parent_with_data();
    sim.kernel.map_test_page(parent, HIGH, PageFlags::USER_RW);
    let child = fork_child(&mut sim);

    assert_eq!(sim.kernel.flags_of(child, HIGH), Some(COW_RO));
    // Three tables of pages plus one step per absent table above them.
    assert!(sim.kernel.walk_count() < 8_000, "walked {} times", sim.kernel.walk_count());

    let child_env = sim.kernel.env(child);
    assert_eq!(
        child_env.walk(VirtAddr(0x0000_1000_0000_0000)),
        PageWalk::Missing { level: PageTableLevel::Four }
    );
    assert_eq!(
        child_env.walk(HIGH.offset(0x4000_0000)),
        PageWalk::Missing { level: PageTableLevel::Three }
    );
    let mapped_vas = |env| -> Vec<VirtAddr> {
        sim.kernel.mapped_pages(env).into_iter().map(|(va, _)| va).collect()
    };
    assert_eq!(mapped_vas(child), mapped_vas(parent));
}

#[test]
fn duppage_maps_the_child_before_the_parent() {
    let (mut sim, parent) = parent_with_data();
    let child = fork_child(&mut sim);
    sim.kernel.syscalls.clear();

    sim.run(parent);
    sim.kernel.map_test_page(parent, SHARED, PageFlags::USER_RW);
    duppage(&mut sim.user(), child, SHARED).unwrap();

    let maps: Vec<_> = sim
        .kernel
        .syscalls
        .iter()
        .filter(|(_, number, _)| *number == SYS_PAGE_MAP)
        .map(|(_, _, args)| EnvId(args[2] as u32))
        .collect();
    assert_eq!(maps, vec![child, EnvId::SELF]);
}

#[test]
fn duppage_of_an_unmapped_page_does_nothing() {
    let (mut sim, _) = parent_with_data();
    let child = fork_child(&mut sim);
    sim.kernel.syscalls.clear();

    duppage(&mut sim.user(), child, DATA.offset(0x1000 * 8)).unwrap();
    assert!(sim.kernel.syscalls.is_empty());
}

#[test]
#[should_panic(expected = "duppage: no")]
fn duppage_without_a_page_table_panics() {
    let (mut sim, _) = parent_with_data();
    let child = fork_child(&mut sim);
    let _ = duppage(&mut sim.user(), child, HIGH);
}

#[test]
fn fork_in_the_child_returns_child() {
    let (mut sim, _) = parent_with_data();
    let before = sim.kernel.syscalls.len();
    let id = sim.current();

    let mut user = UserEnv::new(&mut sim.kernel, id);
    user.as_child = true;
    assert_eq!(fork(&mut user), Ok(ForkResult::Child));
    assert_eq!(sfork(&mut user), Ok(ForkResult::Child));

    let after: Vec<_> = sim.kernel.syscalls[before..]
        .iter()
        .filter(|(_, number, _)| *number == SYS_PAGE_MAP)
        .collect();
    assert!(after.is_empty());
}

#[test]
fn fork_reports_exhausted_environments() {
    let (mut sim, _) = parent_with_data();
    sim.kernel.max_envs = 1;
    assert_eq!(
        fork(&mut sim.user()),
        Err(ForkError::Exofork(KernError::NoFreeEnv))
    );
}

#[test]
fn handler_is_installed_once() {
    let (mut sim, parent) = parent_with_data();
    set_pgfault_handler(&mut sim.user()).unwrap();
    let stack = sim.kernel.frame_of(parent, UXSTACK_BASE);
    set_pgfault_handler(&mut sim.user()).unwrap();

    assert!(stack.is_some());
    assert_eq!(sim.kernel.frame_of(parent, UXSTACK_BASE), stack);
    assert_eq!(sim.kernel.env(parent).upcall, Some(UPCALL_ENTRY));
}

#[test]
fn write_to_a_plain_read_only_page_kills_the_writer() {
    let (mut sim, parent) = parent_with_data();
    set_pgfault_handler(&mut sim.user()).unwrap();

    let err = sim.store(PROCESS_CODE_START_VA, 1).unwrap_err();
    assert!(matches!(err, StoreError::Handler(CowFaultError::NotCow { .. })));
    assert!(!sim.kernel.is_live(parent));
}

fn fault(va: VirtAddr, err: u64) -> UTrapframe {
    UTrapframe { fault_va: va.as_u64(), err, ..UTrapframe::default() }
}

#[test]
fn handler_rejects_reads_and_unmapped_pages() {
    let (mut sim, _) = parent_with_data();
    let mut user = sim.user();

    assert!(matches!(
        pgfault(&mut user, &fault(DATA, FEC_PR | FEC_U)),
        Err(CowFaultError::NotWrite { .. })
    ));
    assert_eq!(
        pgfault(&mut user, &fault(VirtAddr(0x0050_0000), FEC_WR | FEC_U)),
        Err(CowFaultError::NotMapped { va: VirtAddr(0x0050_0000) })
    );
}

#[test]
fn handler_reports_allocation_failure() {
    let (mut sim, _) = parent_with_data();
    fork_child(&mut sim);
    sim.kernel.max_frames = 0;

    assert_eq!(
        pgfault(&mut sim.user(), &fault(DATA, FEC_PR | FEC_WR | FEC_U)),
        Err(CowFaultError::Alloc(KernError::NoMem))
    );
}

#[test]
#[should_panic(expected = "pgfault: fault at 0x401000 is not a write")]
fn unresolvable_fault_panics_in_the_upcall() {
    let (mut sim, _) = parent_with_data();
    handle_upcall(&mut sim.user(), &fault(DATA, FEC_U));
}

#[test]
fn copied_page_keeps_every_unwritten_byte() {
    let mut sim = Sim::new();
    let parent = sim.boot_env();
    sim.kernel.map_test_page(parent, DATA, PageFlags::USER_RW);
    let pattern: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
    sim.kernel.poke(parent, DATA, &pattern);
    let child = fork_child(&mut sim);

    sim.run(child);
    sim.store(DATA.offset(0x10), 0xEE).unwrap();

    let copy = sim.kernel.read_user(child, DATA, 4096).unwrap();
    let mut expected = pattern.clone();
    expected[0x10] = 0xEE;
    assert_eq!(copy, expected);
    assert_eq!(sim.kernel.read_user(parent, DATA, 4096).unwrap(), pattern);
}

#[test]
fn promoted_page_no_longer_qualifies_for_a_copy() {
    let (mut sim, _) = parent_with_data();
    fork_child(&mut sim);
    sim.store(DATA, 2).unwrap();

    assert!(matches!(
        pgfault(&mut sim.user(), &fault(DATA, FEC_PR | FEC_WR | FEC_U)),
        Err(CowFaultError::NotCow { .. })
    ));
}

#[test]
fn cow_write_without_a_handler_kills_the_writer() {
    let mut sim = Sim::new();
    let env = sim.boot_env();
    sim.kernel.map_test_page(env, DATA, COW_RO);

    let err = sim.store(DATA, 1).unwrap_err();
    assert!(matches!(err, StoreError::Killed(_)));
    assert!(!sim.kernel.is_live(env));
}

#[test]
fn exception_stack_is_never_cow_after_fork() {
    let (mut sim, parent) = parent_with_data();
    let child = fork_child(&mut sim);
    sim.run(child);
    let grandchild = fork_child(&mut sim);

    for env in [parent, child, grandchild] {
        let flags = sim.kernel.flags_of(env, UXSTACK_BASE).unwrap();
        assert!(!flags.contains(PageFlags::COW), "{} has a cow exception stack", env);
    }
}
