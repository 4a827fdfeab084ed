use hfsm_core::{
    AgentKind, Behavior, Event, MachineCtx, Message, MsgData, MsgName, On, QueueId, Runtime,
    RuntimeConfig,
};

const MSG_TICK: MsgName = MsgName("tick");
const MSG_BEAT: MsgName = MsgName("beat");
const MSG_GOTO: MsgName = MsgName("goto");

const STATE_X: u32 = 0;
const STATE_Y: u32 = 1;

#[derive(Default)]
struct TestWorld {
    ticks: Vec<f64>,
    beats: u32,
}

/// State X arms a periodic state-scoped timer on enter; a global handler
/// changes state on request. `beat` runs on a machine-scoped timer and stops
/// itself after two deliveries.
struct Metronome;

impl Behavior<TestWorld> for Metronome {
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
                    ctx.declare(&[On::Enter]);
                    true
                }
                Event::Enter => {
                    ctx.set_timer_state(0.5, MSG_TICK);
                    true
                }
                _ => false,
            },
            (-1, -1) => match event {
                Event::Message => {
                    let m = msg.unwrap();
                    if m.name == MSG_TICK {
                        world.ticks.push(ctx.now());
                        return true;
                    }
                    if m.name == MSG_BEAT {
                        world.beats += 1;
                        if world.beats == 2 {
                            ctx.stop_timer(MSG_BEAT);
                        }
                        return true;
                    }
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
            _ => false,
        }
    }
}

#[test]
fn state_timer_re_arms_until_the_state_changes() {
    let mut world = TestWorld::default();
    let mut rt = Runtime::new(RuntimeConfig::default());
    let id = rt.spawn(AgentKind(1));
    rt.push_machine(id, QueueId(0), Box::new(Metronome), &mut world)
        .unwrap();

    // Leave X between the 1.5s and 2.0s firings.
    rt.post_msg_delayed(1.75, MSG_GOTO, id, MsgData::Int(STATE_Y as i32))
        .unwrap();

    for _ in 0..10 {
        rt.tick(0.25, &mut world); // through t = 2.5
    }

    assert_eq!(world.ticks, vec![0.5, 1.0, 1.5]);
    assert_eq!(rt.machine(id, QueueId(0)).unwrap().state(), STATE_Y);
    // The stale timer was dropped at delivery and never re-armed.
    assert_eq!(rt.router().count_by_name(MSG_TICK), 0);
}

#[test]
fn stop_timer_purges_the_pending_rearm() {
    let mut world = TestWorld::default();
    let mut rt = Runtime::new(RuntimeConfig::default());
    let id = rt.spawn(AgentKind(1));
    rt.push_machine(id, QueueId(0), Box::new(Beater), &mut world)
        .unwrap();

    for _ in 0..12 {
        rt.tick(0.25, &mut world); // through t = 3.0
    }

    assert_eq!(world.beats, 2);
    assert_eq!(rt.router().count_by_name(MSG_BEAT), 0);
}

/// Arms a machine-scoped timer; shares the Metronome's global handlers.
struct Beater;

impl Behavior<TestWorld> for Beater {
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
                    ctx.declare(&[On::Enter]);
                    true
                }
                Event::Enter => {
                    ctx.set_timer_machine(0.5, MSG_BEAT);
                    true
                }
                _ => false,
            },
            (-1, -1) => Metronome.states(event, msg, state, substate, ctx, world),
            _ => false,
        }
    }
}

#[test]
fn timer_below_one_frame_is_clamped_up() {
    let mut world = TestWorld::default();
    let mut rt = Runtime::new(RuntimeConfig::default());
    let id = rt.spawn(AgentKind(1));
    rt.push_machine(id, QueueId(0), Box::new(Clamped), &mut world)
        .unwrap();

    rt.tick(0.25, &mut world);
    // One delivery per tick, not an unbounded same-tick loop.
    assert_eq!(world.beats, 1);
    rt.tick(0.25, &mut world);
    assert_eq!(world.beats, 2);
}

/// Arms a zero-delay machine timer, which clamps to one frame.
struct Clamped;

impl Behavior<TestWorld> for Clamped {
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
                    ctx.declare(&[On::Enter]);
                    true
                }
                Event::Enter => {
                    ctx.set_timer_machine(0.0, MSG_BEAT);
                    true
                }
                _ => false,
            },
            (-1, -1) => match event {
                Event::Message => {
                    let m = msg.unwrap();
                    if m.name == MSG_BEAT {
                        world.beats += 1;
                        return true;
                    }
                    false
                }
                _ => false,
            },
            _ => false,
        }
    }
}
