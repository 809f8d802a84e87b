use state_machines::state_machine;

state_machine! {
    name: BuildMachine,
    state: BuildState,
    initial: Ready,
    states: [Ready, Mapped, Planned, Extracted, Enhanced, Failed],
    events {
        map_documents { transition: { from: Ready, to: Mapped } }
        plan { transition: { from: Mapped, to: Planned } }
        extract { transition: { from: Planned, to: Extracted } }
        enhance { transition: { from: Extracted, to: Enhanced } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Mapped, to: Failed }
            transition: { from: Planned, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Enhanced, to: Failed }
        }
    }
}

pub fn ready() -> BuildMachine<(), Ready> {
    BuildMachine::new(())
}
