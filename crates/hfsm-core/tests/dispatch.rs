use hfsm_core::{
    AgentKind, Behavior, Event, MachineCtx, Message, MsgData, MsgName, On, QueueId, Runtime,
    RuntimeConfig,
};

const MSG_SUB_ONLY: MsgName = MsgName("sub_only");
const MSG_STATE_ONLY: MsgName = MsgName("state_only");
const MSG_ANYONE: MsgName = MsgName("anyone");
const MSG_GOTO: MsgName = MsgName("goto");

#[derive(Default)]
struct TestWorld {
    log: Vec<String>,
    update_bodies: u32,
}

/// State 0 carries substate 0. Message handling is spread across the three
/// rungs so the fallback order is observable.
struct Ladder;

impl Behavior<TestWorld> for Ladder {
    fn states(
        &mut self,
        event: Event,
        msg: Option<&Message>,
        state: i32,
        substate: i32,
        ctx: &mut MachineCtx<'_, TestWorld>,
        world: &mut TestWorld,
    ) -> bool {
        match (state, substate) {
            (0, 0) => match event {
                Event::Probe => true,
                Event::Message => {
                    let m = msg.unwrap();
                    if m.name == MSG_SUB_ONLY {
                        world.log.push("sub".into());
                        return true;
                    }
                    false
                }
                _ => false,
            },
            (0, -1) => match event {
                Event::Probe => {
                    ctx.declare(&[On::Enter]);
                    true
                }
                Event::Enter => {
                    ctx.change_substate(0);
                    true
                }
                Event::Message => {
                    let m = msg.unwrap();
                    if m.name == MSG_SUB_ONLY || m.name == MSG_STATE_ONLY {
                        world.log.push("state".into());
                        return true;
                    }
                    false
                }
                _ => false,
            },
            (-1, -1) => match event {
                Event::Message => {
                    world.log.push("global".into());
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}

#[test]
fn message_falls_through_substate_then_state_then_global() {
    let mut world = TestWorld::default();
    let mut rt = Runtime::new(RuntimeConfig::default());
    let id = rt.spawn(AgentKind(1));
    rt.push_machine(id, QueueId(0), Box::new(Ladder), &mut world)
        .unwrap();
    assert_eq!(rt.machine(id, QueueId(0)).unwrap().substate(), Some(0));

    // Handled at the substate rung: state and global never see it.
    rt.post_msg(MSG_SUB_ONLY, id, MsgData::None).unwrap();
    rt.tick(0.25, &mut world);
    assert_eq!(world.log, vec!["sub"]);

    // Unhandled at the substate rung, handled at the state rung.
    rt.post_msg(MSG_STATE_ONLY, id, MsgData::None).unwrap();
    rt.tick(0.25, &mut world);
    assert_eq!(world.log, vec!["sub", "state"]);

    // Unhandled everywhere but the global rung.
    rt.post_msg(MSG_ANYONE, id, MsgData::None).unwrap();
    rt.tick(0.25, &mut world);
    assert_eq!(world.log, vec!["sub", "state", "global"]);
}

/// Declares no Update handler, but has an Update body that must never run
/// because the probe never reported it.
struct UndeclaredUpdate;

impl Behavior<TestWorld> for UndeclaredUpdate {
    fn states(
        &mut self,
        event: Event,
        _msg: Option<&Message>,
        state: i32,
        substate: i32,
        _ctx: &mut MachineCtx<'_, TestWorld>,
        world: &mut TestWorld,
    ) -> bool {
        match (state, substate) {
            (0, -1) => match event {
                Event::Probe => true,
                Event::Update => {
                    world.update_bodies += 1;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// Declares its Update handler, which must then tick every frame.
struct DeclaredUpdate;

impl Behavior<TestWorld> for DeclaredUpdate {
    fn states(
        &mut self,
        event: Event,
        _msg: Option<&Message>,
        state: i32,
        substate: i32,
        ctx: &mut MachineCtx<'_, TestWorld>,
        world: &mut TestWorld,
    ) -> bool {
        match (state, substate) {
            (0, -1) => match event {
                Event::Probe => {
                    ctx.declare(&[On::Update]);
                    true
                }
                Event::Update => {
                    world.update_bodies += 1;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}

#[test]
fn update_dispatch_is_gated_on_probe_declarations() {
    let mut world = TestWorld::default();
    let mut rt = Runtime::new(RuntimeConfig::default());

    let silent = rt.spawn(AgentKind(1));
    rt.push_machine(silent, QueueId(0), Box::new(UndeclaredUpdate), &mut world)
        .unwrap();
    for _ in 0..5 {
        rt.tick(0.25, &mut world);
    }
    assert_eq!(world.update_bodies, 0);

    let ticking = rt.spawn(AgentKind(1));
    rt.push_machine(ticking, QueueId(0), Box::new(DeclaredUpdate), &mut world)
        .unwrap();
    for _ in 0..5 {
        rt.tick(0.25, &mut world);
    }
    assert_eq!(world.update_bodies, 5);
}

/// Logs the full lifecycle so Exit/Probe/Enter ordering is observable.
struct Lifecycle;

impl Behavior<TestWorld> for Lifecycle {
    fn states(
        &mut self,
        event: Event,
        msg: Option<&Message>,
        state: i32,
        substate: i32,
        ctx: &mut MachineCtx<'_, TestWorld>,
        world: &mut TestWorld,
    ) -> bool {
        match (state, substate) {
            (-1, -1) => match event {
                Event::Message => {
                    let m = msg.unwrap();
                    if m.name == MSG_GOTO {
                        if let Some(s) = m.data.as_int() {
                            ctx.change_state(s as u32);
                        }
                        return true;
                    }
                    false
                }
                _ => false,
            },
            (s, -1) => match event {
                Event::Probe => {
                    world.log.push(format!("probe({s})"));
                    ctx.declare(&[On::Enter, On::Exit]);
                    true
                }
                Event::Enter => {
                    world.log.push(format!("enter({s})"));
                    true
                }
                Event::Exit => {
                    world.log.push(format!("exit({s})"));
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}

#[test]
fn exit_precedes_probe_and_enter_of_the_next_state() {
    let mut world = TestWorld::default();
    let mut rt = Runtime::new(RuntimeConfig::default());
    let id = rt.spawn(AgentKind(1));
    rt.push_machine(id, QueueId(0), Box::new(Lifecycle), &mut world)
        .unwrap();
    world.log.clear();

    rt.post_msg(MSG_GOTO, id, MsgData::Int(1)).unwrap();
    rt.tick(0.25, &mut world);

    assert_eq!(world.log, vec!["exit(0)", "probe(1)", "enter(1)"]);
}

#[test]
fn every_enter_is_preceded_by_exactly_one_probe_at_the_same_state() {
    let mut world = TestWorld::default();
    let mut rt = Runtime::new(RuntimeConfig::default());
    let id = rt.spawn(AgentKind(1));
    rt.push_machine(id, QueueId(0), Box::new(Lifecycle), &mut world)
        .unwrap();

    for s in [1, 2, 3] {
        rt.post_msg(MSG_GOTO, id, MsgData::Int(s)).unwrap();
        rt.tick(0.25, &mut world);
    }

    for s in 0..=3 {
        let probes = world.log.iter().filter(|e| **e == format!("probe({s})")).count();
        let enters = world.log.iter().filter(|e| **e == format!("enter({s})")).count();
        assert_eq!(probes, enters, "state {s}");
        let probe_at = world.log.iter().position(|e| *e == format!("probe({s})"));
        let enter_at = world.log.iter().position(|e| *e == format!("enter({s})"));
        assert!(probe_at < enter_at, "state {s}");
    }
}

/// Requests a state change from inside its Exit handler, which is a teardown
/// phase where transitions are rejected.
struct ChangeInExit;

impl Behavior<TestWorld> for ChangeInExit {
    fn states(
        &mut self,
        event: Event,
        msg: Option<&Message>,
        state: i32,
        substate: i32,
        ctx: &mut MachineCtx<'_, TestWorld>,
        world: &mut TestWorld,
    ) -> bool {
        match (state, substate) {
            (0, -1) => match event {
                Event::Probe => {
                    ctx.declare(&[On::Exit]);
                    true
                }
                Event::Exit => {
                    ctx.change_state(9);
                    true
                }
                _ => false,
            },
            (-1, -1) => match event {
                Event::Message => {
                    let m = msg.unwrap();
                    if m.name == MSG_GOTO {
                        if let Some(s) = m.data.as_int() {
                            ctx.change_state(s as u32);
                        }
                        return true;
                    }
                    false
                }
                _ => false,
            },
            (s, -1) => match event {
                Event::Probe => true,
                Event::Enter => {
                    world.log.push(format!("enter({s})"));
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "not allowed in an exit handler"))]
fn change_requested_during_exit_is_rejected() {
    let mut world = TestWorld::default();
    let mut rt = Runtime::new(RuntimeConfig::default());
    let id = rt.spawn(AgentKind(1));
    rt.push_machine(id, QueueId(0), Box::new(ChangeInExit), &mut world)
        .unwrap();

    rt.post_msg(MSG_GOTO, id, MsgData::Int(1)).unwrap();
    rt.tick(0.25, &mut world);

    // Release builds: the exit-time request was dropped, the original
    // transition went through.
    assert_eq!(rt.machine(id, QueueId(0)).unwrap().state(), 1);
}
