//! A simulated debugging engine: one session with two processes.

use std::sync::Arc;

use dmodel_client::{
    connect_local, ClientConfig, EngineHandle, InMemoryProvider, ProtocolClient, ProviderResult,
};
use dmodel_loader::{LazyTreeLoader, LoaderConfig};
use dmodel_protocol::ObjectDescriptor;
use dmodel_types::{attributes, AttributeValue, Capability, CapabilitySet, ExecutionState, PathAddress};

pub const THREADS: &str = "Threads";
pub const MODULES: &str = "Modules";
pub const REGISTERS: &str = "Registers";
pub const STACK: &str = "Stack";

/// The client, loader, and engine of one simulated session.
pub struct Session {
    pub provider: Arc<InMemoryProvider>,
    pub client: ProtocolClient,
    pub engine: EngineHandle,
    pub loader: LazyTreeLoader,
}

impl Session {
    /// Populate the simulated engine and connect a loader to it. Must be
    /// called inside a Tokio runtime.
    pub fn start(config: LoaderConfig) -> anyhow::Result<Self> {
        let provider = Arc::new(populate()?);
        let (client, engine) = connect_local(provider.clone(), &ClientConfig::default());
        let loader = LazyTreeLoader::new(
            Arc::new(client.clone()),
            Arc::new(ObjectDescriptor::root()),
            config,
        );
        Ok(Self {
            provider,
            client,
            engine,
            loader,
        })
    }
}

fn process_caps() -> CapabilitySet {
    CapabilitySet::new()
        .with(Capability::Interruptible)
        .with(Capability::Resumable)
        .with(Capability::Killable)
}

fn thread_caps() -> CapabilitySet {
    CapabilitySet::new()
        .with(Capability::Interruptible)
        .with(Capability::Steppable)
        .with(Capability::Resumable)
}

fn container(key: &str) -> ObjectDescriptor {
    ObjectDescriptor::new(key, "Container").with_attribute(attributes::KIND, "container")
}

pub fn thread(tid: i64) -> ObjectDescriptor {
    ObjectDescriptor::new(format!("{tid:#x}"), "Thread")
        .with_display(format!("Thread {tid:#x}"))
        .with_capabilities(thread_caps())
        .with_attribute(attributes::TID, tid)
        .with_attribute(attributes::STATE, ExecutionState::Running)
}

fn populate() -> ProviderResult<InMemoryProvider> {
    let p = InMemoryProvider::new();
    let root = PathAddress::root();

    let processes: [(i64, &str, &[i64], &[(&str, i64)]); 2] = [
        (
            1234,
            "notepad.exe",
            &[0x1a0, 0x1a4],
            &[("notepad.exe", 0x7ff6_1000_0000), ("ntdll.dll", 0x7ffb_2000_0000)],
        ),
        (5678, "calc.exe", &[0x2b0], &[("calc.exe", 0x7ff7_3000_0000)]),
    ];

    for (pid, image, tids, modules) in processes {
        let process = p.insert(
            &root,
            ObjectDescriptor::new(pid.to_string(), "Process")
                .with_display(format!("{image} ({pid})"))
                .with_capabilities(process_caps())
                .with_attribute(attributes::PID, pid)
                .with_attribute(attributes::DISPLAY, image)
                .with_attribute(attributes::STATE, ExecutionState::Running),
        )?;

        let threads = p.insert(&process, container(THREADS))?;
        for &tid in tids {
            let thread_path = p.insert(&threads, thread(tid))?;
            let regs = p.insert(
                &thread_path,
                ObjectDescriptor::new(REGISTERS, "RegisterBank").immutable(),
            )?;
            for (name, value) in [("rax", tid as u64), ("rip", 0x7ff6_1000_1000 + tid as u64)] {
                p.insert(
                    &regs,
                    ObjectDescriptor::new(name, "Register")
                        .immutable()
                        .with_attribute("value", AttributeValue::Bytes(value.to_be_bytes().to_vec())),
                )?;
            }
            let stack = p.insert(&thread_path, container(STACK))?;
            for level in 0..2i64 {
                p.insert(
                    &stack,
                    ObjectDescriptor::new(level.to_string(), "StackFrame")
                        .with_display(format!("#{level}"))
                        .with_attribute("level", level),
                )?;
            }
        }

        let module_list = p.insert(&process, container(MODULES))?;
        for &(name, base) in modules {
            p.insert(
                &module_list,
                ObjectDescriptor::new(name, "Module")
                    .immutable()
                    .with_attribute("base", base)
                    .with_attribute("path", PathAddress::new(["C:", "Windows", name])),
            )?;
        }
    }
    Ok(p)
}
