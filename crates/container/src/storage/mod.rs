//! Open-addressing хэш-хранилище для scope и policies
//!
//! Две параллельные таблицы:
//! - `meta` длины `PRIMES[p + 1]`: `position` хранит голову цепочки бакета,
//!   `location` хранит ссылку на следующий элемент цепочки для записи с тем же индексом;
//! - `data` длины `PRIMES[p]`: записи, индекс 0 зарезервирован (sentinel).
//!
//! Бакет = `hash % meta.len()`. Рост (`expand`) переходит на следующее простое
//! и перехэширует все живые записи. Записи не удаляются, только заменяются.
//!
//! Обе таблицы хранятся блоками по `CHUNK` элементов за `Arc`: клон таблицы
//! копирует только указатели на блоки, изменение копирует затронутый блок.
//! Copy-on-write снимки scope и policies поэтому не копируют всю таблицу
//! при каждой записи.

pub mod prime;

use std::sync::Arc;

/// Элементов в одном разделяемом блоке
pub const CHUNK: usize = 64;

/// Элемент цепочки бакета
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    pub position: usize,
    pub location: usize,
}

/// Запись, которая знает свой хэш
pub trait Hashed {
    fn hash_code(&self) -> u32;
}

/// Массив фиксированной длины из блоков, разделяемых между клонами
#[derive(Clone)]
struct Chunked<T> {
    len: usize,
    chunks: Vec<Arc<Vec<T>>>,
}

impl<T: Clone> Chunked<T> {
    fn filled(len: usize, value: impl Fn() -> T) -> Self {
        let chunks = (0..len)
            .step_by(CHUNK)
            .map(|start| {
                let size = CHUNK.min(len - start);
                let mut chunk = Vec::with_capacity(size);
                chunk.resize_with(size, &value);
                Arc::new(chunk)
            })
            .collect();
        Self { len, chunks }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.chunks
            .get(index / CHUNK)
            .and_then(|chunk| chunk.get(index % CHUNK))
    }

    /// Блок копируется, только если он разделен с другим клоном
    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.chunks
            .get_mut(index / CHUNK)
            .and_then(|chunk| Arc::make_mut(chunk).get_mut(index % CHUNK))
    }

    fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.chunks.iter().flat_map(|chunk| chunk.iter())
    }

    fn shared_with(&self, other: &Self) -> usize {
        self.chunks
            .iter()
            .zip(&other.chunks)
            .filter(|(a, b)| Arc::ptr_eq(a, b))
            .count()
    }
}

#[derive(Clone)]
pub struct Table<E> {
    prime: usize,
    count: usize,
    meta: Chunked<Metadata>,
    data: Chunked<Option<E>>,
}

impl<E: Hashed + Clone> Table<E> {
    pub fn with_capacity(capacity: usize) -> Self {
        let prime = prime::index_for(capacity + 1);
        Self::allocate(prime)
    }

    fn allocate(prime: usize) -> Self {
        Self {
            prime,
            count: 0,
            meta: Chunked::filled(prime::PRIMES[prime + 1], Metadata::default),
            data: Chunked::filled(prime::PRIMES[prime], || None),
        }
    }

    /// Количество живых записей
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Сколько записей поместится без `expand`
    pub fn capacity(&self) -> usize {
        self.data.len() - 1
    }

    pub fn prime_index(&self) -> usize {
        self.prime
    }

    fn meta(&self, index: usize) -> Metadata {
        self.meta.get(index).copied().unwrap_or_default()
    }

    /// Найти индекс записи с данным хэшем, удовлетворяющей предикату
    pub fn find(&self, hash: u32, mut matches: impl FnMut(&E) -> bool) -> Option<usize> {
        let bucket = hash as usize % self.meta.len();
        let mut position = self.meta(bucket).position;

        while position > 0 {
            if let Some(entry) = self.get(position) {
                if entry.hash_code() == hash && matches(entry) {
                    return Some(position);
                }
            }
            position = self.meta(position).location;
        }

        None
    }

    pub fn get(&self, index: usize) -> Option<&E> {
        self.data.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut E> {
        self.data.get_mut(index).and_then(Option::as_mut)
    }

    /// Заменить запись по индексу. Хэш новой записи должен совпадать со старым.
    pub fn replace(&mut self, index: usize, entry: E) -> Option<E> {
        debug_assert!(index > 0 && index <= self.count);
        debug_assert_eq!(
            self.get(index).map(Hashed::hash_code),
            Some(entry.hash_code())
        );
        self.data.get_mut(index).and_then(|slot| slot.replace(entry))
    }

    /// Добавить запись в конец, при необходимости расширив таблицу
    pub fn push(&mut self, entry: E) -> usize {
        let index = self.reserve(entry.hash_code());
        if let Some(slot) = self.data.get_mut(index) {
            *slot = Some(entry);
        }
        index
    }

    /// Найденная запись или новая запись из `create`, добавленная в конец
    pub fn find_or_push(
        &mut self,
        hash: u32,
        matches: impl FnMut(&E) -> bool,
        create: impl FnOnce() -> E,
    ) -> (usize, &mut E) {
        let index = match self.find(hash, matches) {
            Some(index) => index,
            None => self.reserve(hash),
        };
        let slot = &mut Arc::make_mut(&mut self.data.chunks[index / CHUNK])[index % CHUNK];
        (index, slot.get_or_insert_with(create))
    }

    /// Следующий свободный индекс, уже связанный с бакетом `hash`
    fn reserve(&mut self, hash: u32) -> usize {
        if self.count + 1 >= self.data.len() {
            self.expand(self.count + 1);
        }

        self.count += 1;
        let index = self.count;
        self.link(index, hash);
        index
    }

    fn link(&mut self, index: usize, hash: u32) {
        let bucket = hash as usize % self.meta.len();
        let head = self.meta(bucket).position;
        if let Some(meta) = self.meta.get_mut(index) {
            meta.location = head;
        }
        if let Some(meta) = self.meta.get_mut(bucket) {
            meta.position = index;
        }
    }

    /// Гарантировать место под `required` записей; рост = следующее простое + rehash
    pub fn expand(&mut self, required: usize) {
        if required < self.data.len() {
            return;
        }

        let prime = prime::index_for(required + 1);
        let previous = std::mem::replace(self, Self::allocate(prime));

        for (index, entry) in previous.iter() {
            self.link(index, entry.hash_code());
            if let Some(slot) = self.data.get_mut(index) {
                *slot = Some(entry.clone());
            }
        }
        self.count = previous.count;
    }

    /// Записи в порядке добавления вместе с их индексами
    pub fn iter(&self) -> impl Iterator<Item = (usize, &E)> + '_ {
        self.data
            .iter()
            .enumerate()
            .skip(1)
            .take(self.count)
            .filter_map(|(index, entry)| entry.as_ref().map(|e| (index, e)))
    }

    /// Сколько блоков записей разделено с `other` (оба - клоны одной таблицы)
    pub fn shared_chunks(&self, other: &Self) -> usize {
        self.data.shared_with(&other.data) + self.meta.shared_with(&other.meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        hash: u32,
        key: u32,
        value: &'static str,
    }

    impl Hashed for Item {
        fn hash_code(&self) -> u32 {
            self.hash
        }
    }

    fn item(key: u32, value: &'static str) -> Item {
        // Намеренно плохой хэш, чтобы получить длинные цепочки
        Item {
            hash: key % 3,
            key,
            value,
        }
    }

    #[test]
    fn test_sentinel_and_push() {
        let mut table = Table::with_capacity(2);
        assert!(table.get(0).is_none());
        assert!(table.is_empty());

        let a = table.push(item(1, "a"));
        let b = table.push(item(4, "b"));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(table.len(), 2);

        assert_eq!(table.find(1, |e| e.key == 1), Some(1));
        assert_eq!(table.find(1, |e| e.key == 4), Some(2));
        assert_eq!(table.find(1, |e| e.key == 7), None);
    }

    #[test]
    fn test_expand_keeps_every_entry() {
        let mut table = Table::with_capacity(0);
        for key in 0..200 {
            table.push(item(key, "v"));
        }

        assert_eq!(table.len(), 200);
        assert!(table.capacity() >= 200);
        for key in 0..200 {
            let index = table.find(key % 3, |e| e.key == key).expect("entry survives growth");
            assert_eq!(table.get(index).map(|e| e.key), Some(key));
        }

        let keys: Vec<u32> = table.iter().map(|(_, e)| e.key).collect();
        assert_eq!(keys, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_explicit_expand_grows_once() {
        let mut table: Table<Item> = Table::with_capacity(1);
        table.expand(100);
        let prime = table.prime_index();
        for key in 0..100 {
            table.push(item(key, "v"));
        }
        assert_eq!(table.prime_index(), prime);
    }

    #[test]
    fn test_replace_in_place() {
        let mut table = Table::with_capacity(4);
        let index = table.push(item(5, "old"));
        table.replace(index, item(5, "new"));

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(index).map(|e| e.value), Some("new"));
    }

    #[test]
    fn test_find_or_push_returns_existing_or_new() {
        let mut table = Table::with_capacity(2);
        let (first, entry) = table.find_or_push(1, |e: &Item| e.key == 1, || item(1, "a"));
        entry.value = "b";

        let (again, entry) = table.find_or_push(1, |e| e.key == 1, || item(1, "c"));
        assert_eq!(first, again);
        assert_eq!(entry.value, "b");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_clone_copies_only_touched_chunks() {
        let mut table = Table::with_capacity(1000);
        for key in 0..500 {
            table.push(item(key, "v"));
        }
        let total = table.shared_chunks(&table.clone());
        assert!(total > 3);

        // data-блок новой записи, ее meta-блок и meta-блок бакета
        let mut copy = table.clone();
        copy.push(item(500, "new"));
        assert!(copy.shared_chunks(&table) >= total - 3);

        assert!(table.find(2, |e| e.key == 500).is_none());
        assert!(copy.find(2, |e| e.key == 500).is_some());
        assert_eq!(table.len(), 500);
        assert_eq!(copy.len(), 501);
    }
}
