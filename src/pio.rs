//! PIO programs and the PIO block driver
//!
//! Two programs feed the capture pipeline. The sampling program reads the
//! parallel bus and toggles a clock pin for every sample; the waveform
//! program drives a fixed bit pattern out of one pin. Both are assembled
//! with the `pio` crate and installed through [`Pio`].

use crate::{
    control::TransferRequest,
    ral::{
        field, get_field,
        pio::{
            CLKDIV::{FRAC, INT},
            CTRL::{CLKDIV_RESTART, SM_ENABLE, SM_RESTART},
            EXECCTRL::{SIDE_EN, WRAP_BOTTOM, WRAP_TOP},
            PINCTRL::{IN_BASE, SET_BASE, SET_COUNT, SIDESET_BASE, SIDESET_COUNT},
            SHIFTCTRL::{AUTOPUSH, FJOIN_RX, IN_SHIFTDIR, OUT_SHIFTDIR, PUSH_THRESH},
        },
        pio_offset, sm_register, GPIO_COUNT, INSTRUCTION_COUNT, PIO0_BASE, PIO1_BASE,
        STATE_MACHINE_COUNT,
    },
    register::RegisterFile,
    Error, Result,
};
use heapless::Vec;
use ::pio::{
    InSource, Instruction, InstructionOperands, JmpCondition, MovDestination, MovOperation,
    MovSource, SetDestination, SideSet,
};

/// The 16-step reference pattern driven on the waveform pin
pub const REFERENCE_PATTERN: [bool; 16] = [
    true, false, true, true, false, true, true, true, false, true, false, false, false, true,
    false, false,
];

/// One of the two PIO blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PioBlock {
    Pio0,
    Pio1,
}

impl PioBlock {
    /// Bus address of the block's registers
    pub const fn base(self) -> u32 {
        match self {
            PioBlock::Pio0 => PIO0_BASE,
            PioBlock::Pio1 => PIO1_BASE,
        }
    }

    pub const fn index(self) -> u8 {
        self as u8
    }
}

/// A state machine within a PIO block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMachineId(u8);

impl StateMachineId {
    pub const SM0: StateMachineId = StateMachineId(0);
    pub const SM1: StateMachineId = StateMachineId(1);
    pub const SM2: StateMachineId = StateMachineId(2);
    pub const SM3: StateMachineId = StateMachineId(3);

    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < STATE_MACHINE_COUNT {
            Some(StateMachineId(index))
        } else {
            None
        }
    }

    pub const fn index(self) -> u8 {
        self.0
    }

    /// This state machine's bit in CTRL and FSTAT fields
    pub const fn bit(self) -> u32 {
        1 << self.0
    }
}

/// The RX FIFO of one state machine, as seen by a DMA channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxFifo {
    block: PioBlock,
    sm: StateMachineId,
}

impl RxFifo {
    pub const fn new(block: PioBlock, sm: StateMachineId) -> Self {
        RxFifo { block, sm }
    }

    /// Bus address that pops the FIFO when read
    pub const fn address(self) -> u32 {
        self.block.base() + pio_offset::RXF + 4 * self.sm.index() as u32
    }

    /// DREQ raised while the FIFO holds data
    pub const fn dreq(self) -> TransferRequest {
        TransferRequest::pio_rx(self.block.index(), self.sm.index())
    }
}

/// An assembled, not yet installed, PIO program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    code: Vec<u16, INSTRUCTION_COUNT>,
    wrap_target: u8,
    wrap_source: u8,
    side_set_bits: u8,
    side_set_optional: bool,
}

impl Program {
    /// Encoded instructions, relative to the program's start
    pub fn code(&self) -> &[u16] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// The instruction the program wraps back to
    pub const fn wrap_target(&self) -> u8 {
        self.wrap_target
    }

    /// The instruction after which the program wraps
    pub const fn wrap_source(&self) -> u8 {
        self.wrap_source
    }
}

/// Assembles programs that loop over their whole body
struct Builder {
    code: Vec<u16, INSTRUCTION_COUNT>,
    side_set: SideSet,
    side_set_bits: u8,
}

impl Builder {
    fn new(side_set_bits: u8) -> Self {
        Builder {
            code: Vec::new(),
            side_set: SideSet::new(false, side_set_bits, false),
            side_set_bits,
        }
    }

    fn push(&mut self, operands: InstructionOperands, side: u8) -> Result<()> {
        let instruction = Instruction {
            operands,
            delay: 0,
            side_set: Some(side),
        };
        self.code
            .push(instruction.encode(self.side_set))
            .map_err(|_| Error::InvalidProgram)
    }

    fn finish(self) -> Result<Program> {
        let last = self.code.len().checked_sub(1).ok_or(Error::InvalidProgram)?;
        Ok(Program {
            code: self.code,
            wrap_target: 0,
            wrap_source: last as u8,
            side_set_bits: self.side_set_bits,
            side_set_optional: false,
        })
    }
}

const NOP: InstructionOperands = InstructionOperands::MOV {
    destination: MovDestination::Y,
    op: MovOperation::None,
    source: MovSource::Y,
};

/// The waveform program: one side-set `nop` per pattern step
///
/// Every step lasts one state machine clock, so the pattern repeats every
/// `pattern.len()` cycles.
pub fn waveform_program(pattern: &[bool]) -> Result<Program> {
    if pattern.is_empty() || pattern.len() > INSTRUCTION_COUNT {
        return Err(Error::InvalidProgram);
    }
    let mut builder = Builder::new(1);
    for &level in pattern {
        builder.push(NOP, level as u8)?;
    }
    builder.finish()
}

/// The sampling program
///
/// Repeats `samples_per_word` times: raise the clock pin, then lower it
/// while shifting in `bus_width` bits from the input pins. With autopush
/// at `bus_width * samples_per_word` bits, every pass pushes one word.
pub fn sampling_program(bus_width: u8, samples_per_word: u8) -> Result<Program> {
    let bits = bus_width as u32 * samples_per_word as u32;
    if bus_width == 0 || samples_per_word == 0 || bits > 32 {
        return Err(Error::InvalidProgram);
    }
    let mut builder = Builder::new(1);
    for _ in 0..samples_per_word {
        builder.push(NOP, 1)?;
        builder.push(
            InstructionOperands::IN {
                source: InSource::PINS,
                bit_count: bus_width,
            },
            0,
        )?;
    }
    builder.finish()
}

/// A state machine clock divider
///
/// Sixteen integer bits and eight fractional bits, as CLKDIV holds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDivider {
    integer: u16,
    fraction: u8,
}

impl ClockDivider {
    /// Run at full system clock speed
    pub const UNITY: ClockDivider = ClockDivider {
        integer: 1,
        fraction: 0,
    };

    /// The divider that brings `system_hz` closest to `target_hz` from above
    ///
    /// Fails if `target_hz` is zero, faster than the system clock, or too
    /// slow for a sixteen bit divider.
    pub const fn new(system_hz: u32, target_hz: u32) -> Result<Self> {
        let error = Error::ClockDivider {
            system_hz,
            target_hz,
        };
        if target_hz == 0 || target_hz > system_hz {
            return Err(error);
        }
        let div_256 = ((system_hz as u64) << 8) / target_hz as u64;
        let integer = div_256 >> 8;
        if integer == 0 || integer > u16::MAX as u64 {
            return Err(error);
        }
        Ok(ClockDivider {
            integer: integer as u16,
            fraction: (div_256 & 0xFF) as u8,
        })
    }

    pub const fn integer(self) -> u16 {
        self.integer
    }

    pub const fn fraction(self) -> u8 {
        self.fraction
    }

    /// CLKDIV register value
    pub const fn bits(self) -> u32 {
        field!(INT, self.integer) | field!(FRAC, self.fraction)
    }
}

/// A program loaded into instruction memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstalledProgram {
    offset: u8,
    length: u8,
    wrap_target: u8,
    wrap_source: u8,
    side_set_bits: u8,
    side_set_optional: bool,
}

impl InstalledProgram {
    /// Instruction memory address of the first instruction
    pub const fn offset(&self) -> u8 {
        self.offset
    }

    pub const fn len(&self) -> u8 {
        self.length
    }

    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    const fn mask(&self) -> u32 {
        let ones = if self.length as usize >= INSTRUCTION_COUNT {
            u32::MAX
        } else {
            (1 << self.length) - 1
        };
        ones << self.offset
    }

    fn side_set(&self) -> SideSet {
        SideSet::new(self.side_set_optional, self.side_set_bits, false)
    }

    /// Value of PINCTRL.SIDESET_COUNT, including the enable bit
    const fn side_set_count(&self) -> u8 {
        self.side_set_bits + self.side_set_optional as u8
    }
}

/// State machine settings applied by [`Pio::configure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMachineConfig {
    pub clock_divider: ClockDivider,
    /// First GPIO read by `in pins`
    pub in_base: u8,
    /// First GPIO driven by side-set
    pub side_set_base: u8,
    /// Push threshold in bits if autopush is on
    pub autopush: Option<u8>,
    /// Shift input towards the LSB instead of the MSB
    pub in_shift_right: bool,
}

impl StateMachineConfig {
    /// Full speed, no autopush, pins at GPIO0
    pub const fn new() -> Self {
        StateMachineConfig {
            clock_divider: ClockDivider::UNITY,
            in_base: 0,
            side_set_base: 0,
            autopush: None,
            in_shift_right: false,
        }
    }
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Driver for one PIO block
///
/// Tracks which instruction memory slots hold installed programs.
pub struct Pio<'r, R: RegisterFile> {
    regs: &'r R,
    block: PioBlock,
    used: u32,
}

fn check_pin(pin: u8) -> Result<()> {
    if pin < GPIO_COUNT {
        Ok(())
    } else {
        Err(Error::InvalidPin(pin))
    }
}

impl<'r, R: RegisterFile> Pio<'r, R> {
    /// Take over `block`, assuming its instruction memory is free
    ///
    /// Call [`reset`](Pio::reset) to make that true.
    pub const fn new(regs: &'r R, block: PioBlock) -> Self {
        Pio {
            regs,
            block,
            used: 0,
        }
    }

    pub const fn block(&self) -> PioBlock {
        self.block
    }

    /// The RX FIFO of state machine `sm`
    pub const fn rx_fifo(&self, sm: StateMachineId) -> RxFifo {
        RxFifo::new(self.block, sm)
    }

    fn register(&self, offset: u32) -> u32 {
        self.block.base() + offset
    }

    fn sm_register(&self, sm: StateMachineId, offset: u32) -> u32 {
        sm_register(self.block.base(), sm.index(), offset)
    }

    /// Stop every state machine and clear instruction memory
    pub fn reset(&mut self) {
        self.regs.write(
            self.register(pio_offset::CTRL),
            field!(SM_RESTART, 0xF) | field!(CLKDIV_RESTART, 0xF),
        );
        for slot in 0..INSTRUCTION_COUNT as u32 {
            self.regs
                .write(self.register(pio_offset::INSTR_MEM + 4 * slot), 0);
        }
        self.used = 0;
        log::debug!("{:?} reset", self.block);
    }

    /// Copy `program` into the first free run of instruction memory
    ///
    /// Jump targets are relocated to the chosen offset.
    pub fn install(&mut self, program: &Program) -> Result<InstalledProgram> {
        let length = program.len();
        if length == 0 || length > INSTRUCTION_COUNT {
            return Err(Error::InvalidProgram);
        }
        let offset = (0..=INSTRUCTION_COUNT - length)
            .find(|&offset| {
                let mask = InstalledProgram {
                    offset: offset as u8,
                    length: length as u8,
                    wrap_target: 0,
                    wrap_source: 0,
                    side_set_bits: 0,
                    side_set_optional: false,
                }
                .mask();
                self.used & mask == 0
            })
            .ok_or(Error::NoProgramSpace { length })? as u8;

        for (index, &instruction) in program.code().iter().enumerate() {
            let instruction = relocate(instruction, offset);
            self.regs.write(
                self.register(pio_offset::INSTR_MEM + 4 * (offset as u32 + index as u32)),
                instruction as u32,
            );
            log::trace!("{:?}[{}] = {:#06X}", self.block, offset as usize + index, instruction);
        }

        let installed = InstalledProgram {
            offset,
            length: length as u8,
            wrap_target: program.wrap_target(),
            wrap_source: program.wrap_source(),
            side_set_bits: program.side_set_bits,
            side_set_optional: program.side_set_optional,
        };
        self.used |= installed.mask();
        Ok(installed)
    }

    /// Free the instruction memory held by `program`
    pub fn uninstall(&mut self, program: InstalledProgram) {
        self.used &= !program.mask();
    }

    /// Apply `config` to `sm` and point it at the start of `program`
    ///
    /// The state machine is stopped, its FIFOs are cleared, and it's left
    /// stopped. Call [`start`](Pio::start) to run it.
    pub fn configure(
        &self,
        sm: StateMachineId,
        program: &InstalledProgram,
        config: &StateMachineConfig,
    ) -> Result<()> {
        check_pin(config.in_base)?;
        check_pin(config.side_set_base)?;
        let push_threshold = match config.autopush {
            Some(0) => return Err(Error::InvalidProgram),
            Some(bits) if bits > 32 => return Err(Error::InvalidProgram),
            // 32 is written as 0.
            Some(bits) => bits & 0x1F,
            None => 0,
        };

        self.stop(sm);
        self.regs.write(
            self.sm_register(sm, pio_offset::SM_CLKDIV),
            config.clock_divider.bits(),
        );
        self.regs.write(
            self.sm_register(sm, pio_offset::SM_EXECCTRL),
            field!(SIDE_EN, program.side_set_optional)
                | field!(WRAP_TOP, program.offset + program.wrap_source)
                | field!(WRAP_BOTTOM, program.offset + program.wrap_target),
        );

        let shiftctrl = field!(PUSH_THRESH, push_threshold)
            | field!(OUT_SHIFTDIR, true)
            | field!(IN_SHIFTDIR, config.in_shift_right)
            | field!(AUTOPUSH, config.autopush.is_some());
        let shiftctrl_address = self.sm_register(sm, pio_offset::SM_SHIFTCTRL);
        // Changing FJOIN_RX clears both FIFOs.
        self.regs
            .write(shiftctrl_address, shiftctrl | FJOIN_RX::mask);
        self.regs.write(shiftctrl_address, shiftctrl);

        self.regs.write(
            self.sm_register(sm, pio_offset::SM_PINCTRL),
            field!(SIDESET_COUNT, program.side_set_count())
                | field!(IN_BASE, config.in_base)
                | field!(SIDESET_BASE, config.side_set_base),
        );

        critical_section::with(|_| {
            let ctrl = self.regs.read(self.register(pio_offset::CTRL));
            self.regs.write(
                self.register(pio_offset::CTRL),
                (ctrl & SM_ENABLE::mask)
                    | field!(SM_RESTART, sm.bit())
                    | field!(CLKDIV_RESTART, sm.bit()),
            );
        });

        let side_set = if program.side_set_bits > 0 && !program.side_set_optional {
            Some(0)
        } else {
            None
        };
        self.exec(
            sm,
            Instruction {
                operands: InstructionOperands::JMP {
                    condition: JmpCondition::Always,
                    address: program.offset,
                },
                delay: 0,
                side_set,
            }
            .encode(program.side_set()),
        );
        log::debug!(
            "{:?} SM{} configured: program at {}, CLKDIV {:#010X}",
            self.block,
            sm.index(),
            program.offset,
            config.clock_divider.bits()
        );
        Ok(())
    }

    /// Make `pin` an output of this block, driven to `high`
    ///
    /// Uses `sm` to execute the `set` instructions, and restores its pin
    /// mapping afterwards. The pin's function select must already route it
    /// to this PIO block.
    pub fn set_pin_output(&self, sm: StateMachineId, pin: u8, high: bool) -> Result<()> {
        check_pin(pin)?;
        let pinctrl_address = self.sm_register(sm, pio_offset::SM_PINCTRL);
        let pinctrl = self.regs.read(pinctrl_address);
        self.regs
            .write(pinctrl_address, field!(SET_BASE, pin) | field!(SET_COUNT, 1));
        for (destination, data) in [
            (SetDestination::PINDIRS, 1),
            (SetDestination::PINS, high as u8),
        ] {
            self.exec(
                sm,
                Instruction {
                    operands: InstructionOperands::SET { destination, data },
                    delay: 0,
                    side_set: None,
                }
                .encode(SideSet::new(false, 0, false)),
            );
        }
        self.regs.write(pinctrl_address, pinctrl);
        Ok(())
    }

    /// Execute `instruction` on `sm` immediately
    fn exec(&self, sm: StateMachineId, instruction: u16) {
        self.regs
            .write(self.sm_register(sm, pio_offset::SM_INSTR), instruction as u32);
    }

    /// Enable `sm`
    pub fn start(&self, sm: StateMachineId) {
        self.update_enable(sm, true);
    }

    /// Disable `sm`; it keeps its program counter and FIFO contents
    pub fn stop(&self, sm: StateMachineId) {
        self.update_enable(sm, false);
    }

    fn update_enable(&self, sm: StateMachineId, enable: bool) {
        critical_section::with(|_| {
            let ctrl = self.regs.read(self.register(pio_offset::CTRL)) & SM_ENABLE::mask;
            let ctrl = if enable {
                ctrl | field!(SM_ENABLE, sm.bit())
            } else {
                ctrl & !field!(SM_ENABLE, sm.bit())
            };
            self.regs.write(self.register(pio_offset::CTRL), ctrl);
        });
    }

    /// Returns `true` if `sm` is enabled
    pub fn is_running(&self, sm: StateMachineId) -> bool {
        get_field!(SM_ENABLE, self.regs.read(self.register(pio_offset::CTRL))) & sm.bit() != 0
    }
}

/// Offset the target of a `jmp` by `offset`
fn relocate(instruction: u16, offset: u8) -> u16 {
    const JMP_MASK: u16 = 0b111 << 13;
    const ADDRESS_MASK: u16 = 0x1F;
    if instruction & JMP_MASK == 0 {
        let address = (instruction & ADDRESS_MASK) + offset as u16;
        (instruction & !ADDRESS_MASK) | (address & ADDRESS_MASK)
    } else {
        instruction
    }
}

/// Install and start the waveform generator
///
/// Drives `pattern` on `pin`, one step per cycle of `frequency_hz`. The pin
/// starts low.
pub fn start_waveform<R: RegisterFile>(
    pio: &mut Pio<'_, R>,
    sm: StateMachineId,
    pattern: &[bool],
    pin: u8,
    frequency_hz: u32,
    system_clock_hz: u32,
) -> Result<InstalledProgram> {
    check_pin(pin)?;
    let clock_divider = ClockDivider::new(system_clock_hz, frequency_hz)?;
    let program = waveform_program(pattern)?;
    let installed = pio.install(&program)?;
    let config = StateMachineConfig {
        clock_divider,
        side_set_base: pin,
        ..StateMachineConfig::new()
    };
    pio.configure(sm, &installed, &config)?;
    pio.set_pin_output(sm, pin, false)?;
    pio.start(sm);
    log::info!(
        "waveform: {} steps on GPIO{} at {} Hz",
        pattern.len(),
        pin,
        frequency_hz
    );
    Ok(installed)
}

/// How the sampling state machine reads the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling {
    /// First GPIO of the parallel bus
    pub in_base: u8,
    /// GPIO pulsed high before every sample
    pub clock_pin: u8,
    /// Bits per sample
    pub bus_width: u8,
    /// Samples packed into each pushed word
    pub samples_per_word: u8,
    /// State machine clock
    pub frequency_hz: u32,
}

/// Install and start the sampling program
///
/// Returns the installed program and the RX FIFO that the primary DMA
/// channel drains.
pub fn start_sampler<R: RegisterFile>(
    pio: &mut Pio<'_, R>,
    sm: StateMachineId,
    sampling: &Sampling,
    system_clock_hz: u32,
) -> Result<(InstalledProgram, RxFifo)> {
    let program = sampling_program(sampling.bus_width, sampling.samples_per_word)?;
    check_pin(sampling.in_base)?;
    check_pin(sampling.clock_pin)?;
    let bus_end = sampling.in_base as u32 + sampling.bus_width as u32;
    if bus_end > GPIO_COUNT as u32 {
        return Err(Error::InvalidPin((bus_end - 1).min(u8::MAX as u32) as u8));
    }
    let clock_divider = ClockDivider::new(system_clock_hz, sampling.frequency_hz)?;
    let installed = pio.install(&program)?;
    let config = StateMachineConfig {
        clock_divider,
        in_base: sampling.in_base,
        side_set_base: sampling.clock_pin,
        autopush: Some(sampling.bus_width * sampling.samples_per_word),
        in_shift_right: false,
    };
    pio.configure(sm, &installed, &config)?;
    pio.set_pin_output(sm, sampling.clock_pin, false)?;
    pio.start(sm);
    log::info!(
        "sampler: {} x {} bits from GPIO{} at {} Hz",
        sampling.samples_per_word,
        sampling.bus_width,
        sampling.in_base,
        sampling.frequency_hz
    );
    Ok((installed, pio.rx_fifo(sm)))
}
